//! Zlib encoding (type 6).
//!
//! `compressed_len: u32` followed by that many bytes of the session-wide Zlib
//! stream. Inflated, they are exactly `width * height` raw pixels.

use crate::zlib_pool::{OutputSize, StreamId};
use crate::{dest_rect, DecoderState, MutablePixelBuffer, Rectangle, RfbInStream};
use anyhow::{Context, Result};
use tokio::io::AsyncRead;

pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    state: &mut DecoderState,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let compressed_len = stream
        .read_u32()
        .await
        .context("Failed to read Zlib compressed length")? as usize;
    let compressed = stream
        .read_vec(compressed_len)
        .await
        .context("Failed to read Zlib compressed data")?;

    let bpp = buffer.pixel_format().bytes_per_pixel() as usize;
    let expected = rect.area() as usize * bpp;
    let pixels = state
        .zlib
        .inflate(StreamId::Zlib, &compressed, OutputSize::Exact(expected))?;

    buffer
        .image_rect(dest_rect(rect), &pixels, 0)
        .context("Failed to write Zlib pixels to buffer")
}
