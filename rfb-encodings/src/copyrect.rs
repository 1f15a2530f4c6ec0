//! CopyRect encoding (type 1).
//!
//! The payload is only `src_x: u16, src_y: u16`. The rectangle's pixels are a
//! copy of the same-sized block at that position in the current framebuffer.

use crate::{dest_rect, MutablePixelBuffer, Rectangle, RfbInStream};
use anyhow::{Context, Result};
use rfb_common::Point;
use tokio::io::AsyncRead;

pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    // The source position is always on the wire, even for an empty rectangle.
    let src_x = stream
        .read_u16()
        .await
        .context("Failed to read CopyRect src_x")?;
    let src_y = stream
        .read_u16()
        .await
        .context("Failed to read CopyRect src_y")?;

    buffer
        .copy_rect(
            dest_rect(rect),
            Point::new(i32::from(src_x), i32::from(src_y)),
        )
        .with_context(|| format!("Failed to copy rectangle from ({}, {})", src_x, src_y))
}
