//! Typed failure roots carried inside `anyhow` chains.
//!
//! Most decode failures are plain protocol violations and stay untyped. The
//! variants here are the ones callers must tell apart: an inflate failure
//! means the persistent stream is desynchronized, a JPEG timeout and a
//! cancellation end the session for different reasons.

use crate::zlib_pool::StreamId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{stream} inflate failed: {message}")]
    Decompression { stream: StreamId, message: String },

    #[error("JPEG decode did not complete within {0:?}")]
    JpegTimeout(Duration),

    #[error("decode cancelled")]
    Cancelled,
}

impl DecodeError {
    /// Find a typed root anywhere in an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&DecodeError> {
        err.chain().find_map(|cause| cause.downcast_ref::<DecodeError>())
    }
}
