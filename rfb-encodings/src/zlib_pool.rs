//! Persistent inflate streams shared across rectangles.
//!
//! Servers compress every rectangle of a given kind through one long-lived
//! deflate stream and flush with `Z_SYNC_FLUSH`, so later rectangles may refer
//! back to bytes sent many updates earlier. The client must therefore keep one
//! inflater per server stream for the whole session:
//!
//! - four Tight streams, selected by the low two bits of the control byte
//! - one ZRLE stream
//! - one plain Zlib stream
//!
//! A stream is created lazily on first use and dropped only when the server
//! sets the matching Tight reset bit (or the session ends).

use crate::error::DecodeError;
use anyhow::Result;
use flate2::{Decompress, FlushDecompress, Status};
use std::fmt;

const OUT_CHUNK: usize = 32 * 1024;

/// Identifies one persistent stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    /// Tight stream 0-3.
    Tight(u8),
    Zrle,
    Zlib,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Tight(id) => write!(f, "Tight stream {}", id),
            StreamId::Zrle => write!(f, "ZRLE stream"),
            StreamId::Zlib => write!(f, "Zlib stream"),
        }
    }
}

/// How much output one rectangle's payload may inflate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSize {
    /// Exactly this many bytes.
    Exact(usize),
    /// Anything up to this many bytes.
    AtMost(usize),
}

impl OutputSize {
    fn limit(self) -> usize {
        match self {
            OutputSize::Exact(n) | OutputSize::AtMost(n) => n,
        }
    }
}

#[derive(Default)]
pub struct ZlibStreamPool {
    tight: [Option<Decompress>; 4],
    zrle: Option<Decompress>,
    zlib: Option<Decompress>,
}

impl fmt::Debug for ZlibStreamPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZlibStreamPool")
            .field(
                "tight",
                &self.tight.iter().map(Option::is_some).collect::<Vec<_>>(),
            )
            .field("zrle", &self.zrle.is_some())
            .field("zlib", &self.zlib.is_some())
            .finish()
    }
}

impl ZlibStreamPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, id: StreamId) -> &mut Option<Decompress> {
        match id {
            StreamId::Tight(n) => &mut self.tight[usize::from(n & 0x03)],
            StreamId::Zrle => &mut self.zrle,
            StreamId::Zlib => &mut self.zlib,
        }
    }

    /// True once the stream has been created and not reset since.
    pub fn is_active(&self, id: StreamId) -> bool {
        match id {
            StreamId::Tight(n) => self.tight[usize::from(n & 0x03)].is_some(),
            StreamId::Zrle => self.zrle.is_some(),
            StreamId::Zlib => self.zlib.is_some(),
        }
    }

    /// Discard a stream; the next use starts a fresh dictionary.
    pub fn reset(&mut self, id: StreamId) {
        if self.slot(id).take().is_some() {
            tracing::debug!("{} reset", id);
        }
    }

    /// Discard every stream.
    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Feed one rectangle's compressed bytes through a persistent stream and
    /// return everything it produces.
    ///
    /// Inflation stops with an error as soon as the output passes the limit
    /// in `size`; an `Exact` size must also be met exactly.
    pub fn inflate(&mut self, id: StreamId, input: &[u8], size: OutputSize) -> Result<Vec<u8>> {
        let limit = size.limit();
        let stream = self.slot(id).get_or_insert_with(|| Decompress::new(true));
        let capacity = match size {
            OutputSize::Exact(n) => n,
            OutputSize::AtMost(n) => n.min(input.len().saturating_mul(4)),
        };
        let mut out = Vec::with_capacity(capacity);

        let fail = |message: String| DecodeError::Decompression { stream: id, message };

        let mut chunk = vec![0u8; OUT_CHUNK];
        let mut in_pos = 0usize;
        loop {
            let before_in = stream.total_in();
            let before_out = stream.total_out();
            let status = stream
                .decompress(&input[in_pos..], &mut chunk, FlushDecompress::Sync)
                .map_err(|e| fail(e.to_string()))?;
            let consumed = (stream.total_in() - before_in) as usize;
            let produced = (stream.total_out() - before_out) as usize;
            in_pos += consumed;
            if out.len() + produced > limit {
                return Err(fail(format!(
                    "output exceeds {} bytes after {} of {} input bytes",
                    limit, in_pos, input.len()
                ))
                .into());
            }
            out.extend_from_slice(&chunk[..produced]);

            if status == Status::StreamEnd {
                break;
            }
            // All input consumed and the last call had spare output room:
            // nothing is left buffered inside the inflater.
            if in_pos >= input.len() && produced < chunk.len() {
                break;
            }
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        if in_pos < input.len() {
            return Err(fail(format!(
                "{} of {} input bytes left unconsumed",
                input.len() - in_pos,
                input.len()
            ))
            .into());
        }
        if let OutputSize::Exact(want) = size {
            if out.len() != want {
                return Err(fail(format!(
                    "inflated {} bytes, expected {}",
                    out.len(),
                    want
                ))
                .into());
            }
        }
        Ok(out)
    }
}
