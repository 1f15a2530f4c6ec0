//! JPEG decoding for Tight rectangles.
//!
//! Decompression runs on tokio's blocking pool so it never stalls the
//! connection task's reactor. The rectangle still completes strictly in
//! order: the caller awaits the result before reading the next rectangle,
//! bounded by a deadline and aborted early when the connection closes.

use crate::error::DecodeError;
use crate::state::CancelSignal;
use anyhow::{anyhow, bail, Context, Result};
use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};
use std::io::Cursor;
use std::time::Duration;

/// A decoded JPEG as 8-bit RGB triples, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegImage {
    pub width: u16,
    pub height: u16,
    pub rgb: Vec<u8>,
}

impl JpegImage {
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * usize::from(self.width) + x) * 3;
        [self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]]
    }
}

/// Decode `data`, waiting at most `timeout`.
pub async fn decode(data: Vec<u8>, timeout: Duration, cancel: &mut CancelSignal) -> Result<JpegImage> {
    run_with_deadline(move || decode_blocking(&data), timeout, cancel).await
}

/// Run `job` on the blocking pool and wait for it under a deadline.
///
/// Fails with [`DecodeError::JpegTimeout`] when the deadline passes and with
/// [`DecodeError::Cancelled`] when `cancel` fires first. An abandoned job runs
/// to completion in the background; its result is dropped.
pub(crate) async fn run_with_deadline<T, F>(
    job: F,
    timeout: Duration,
    cancel: &mut CancelSignal,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(job);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DecodeError::Cancelled.into()),
        joined = tokio::time::timeout(timeout, handle) => match joined {
            Err(_) => {
                tracing::warn!("JPEG decode exceeded {:?}", timeout);
                Err(DecodeError::JpegTimeout(timeout).into())
            }
            Ok(Err(join_err)) => Err(anyhow!("JPEG decode task failed: {}", join_err)),
            Ok(Ok(result)) => result,
        },
    }
}

fn decode_blocking(data: &[u8]) -> Result<JpegImage> {
    let mut decoder = Decoder::new(Cursor::new(data));
    let pixels = decoder.decode().context("Invalid JPEG data")?;
    let info = decoder
        .info()
        .context("JPEG decoder returned no image info")?;

    let rgb = match info.pixel_format {
        JpegPixelFormat::RGB24 => pixels,
        JpegPixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => bail!("Unsupported JPEG pixel format {:?}", other),
    };

    let expected = usize::from(info.width) * usize::from(info.height) * 3;
    if rgb.len() != expected {
        bail!(
            "JPEG produced {} bytes, expected {} for {}x{}",
            rgb.len(),
            expected,
            info.width,
            info.height
        );
    }

    Ok(JpegImage {
        width: info.width,
        height: info.height,
        rgb,
    })
}
