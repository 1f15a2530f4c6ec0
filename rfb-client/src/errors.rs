//! Error types for the RFB client.

use rfb_encodings::DecodeError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running the update pipeline.
///
/// Everything except [`RfbClientError::Config`] ends the session: decoder
/// state (persistent zlib streams, tile colours) cannot be trusted after a
/// failure, so there is no degraded mode.
#[derive(Debug, Error)]
pub enum RfbClientError {
    /// Transport-level error (read or write on the stream pair failed).
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed or inconsistent data from the server.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Rectangle encoding id this pipeline cannot parse.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(i32),

    /// Server message type this pipeline does not handle.
    #[error("Unsupported server message type: {0}")]
    UnsupportedMessage(u8),

    /// A persistent inflate stream is corrupt.
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// JPEG decoding did not finish in time.
    #[error("JPEG decode timed out after {0:?}")]
    JpegTimeout(Duration),

    /// The session was closed while work was pending.
    #[error("Cancelled")]
    Cancelled,

    /// Encoding/decoding error that does not fit a more specific variant.
    #[error("Encoding error: {0:#}")]
    Encoding(anyhow::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Internal error (should not happen in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RfbClientError {
    /// Classify a decoder failure by the typed root in its chain.
    ///
    /// Untyped failures are protocol violations: the payload did not match
    /// the layout its encoding declares.
    pub fn from_decode(err: anyhow::Error) -> Self {
        match DecodeError::find(&err) {
            Some(DecodeError::Decompression { .. }) => Self::Decompression(format!("{err:#}")),
            Some(DecodeError::JpegTimeout(timeout)) => Self::JpegTimeout(*timeout),
            Some(DecodeError::Cancelled) => Self::Cancelled,
            None => match err.downcast::<io::Error>() {
                Ok(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
                    Self::Transport(io_err)
                }
                Ok(io_err) => Self::ProtocolViolation(io_err.to_string()),
                Err(err) => Self::ProtocolViolation(format!("{err:#}")),
            },
        }
    }

    /// Returns true if this error is potentially retryable.
    ///
    /// Nothing produced by the pipeline is: a broken session must be torn
    /// down and reconnected by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns true if this is a fatal error that ends the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
