//! Raw encoding (type 0).
//!
//! `width * height` pixels in the negotiated format, row-major, no padding.
//! Hextile's raw tiles reuse the same layout through [`decode_into`].

use crate::{dest_rect, MutablePixelBuffer, Rectangle, RfbInStream};
use anyhow::{Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    decode_into(stream, dest_rect(rect), buffer).await
}

/// Read raw pixels for `dest` and blit them in.
pub async fn decode_into<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    dest: Rect,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    if dest.is_empty() {
        return Ok(());
    }

    let bpp = buffer.pixel_format().bytes_per_pixel() as usize;
    let len = dest.width as usize * dest.height as usize * bpp;
    let pixels = stream
        .read_vec(len)
        .await
        .context("Failed to read raw pixel data from stream")?;

    buffer
        .image_rect(dest, &pixels, 0)
        .context("Failed to write raw pixel data to buffer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fb32, fb8, rect, stream};
    use crate::ENCODING_RAW;
    use rfb_pixelbuffer::PixelBuffer;

    #[tokio::test]
    async fn test_decode_empty_rectangle() {
        let mut fb = fb32(10, 10);
        let mut s = stream(vec![]);
        decode(&mut s, &rect(0, 0, 0, 0, ENCODING_RAW), &mut fb)
            .await
            .unwrap();
        assert_eq!(s.bytes_read(), 0);
    }

    #[tokio::test]
    async fn test_decode_reproduces_wire_bytes() {
        let mut fb = fb32(4, 4);
        let wire: Vec<u8> = (0..2 * 3 * 4).map(|i| i as u8).collect();
        let mut s = stream(wire.clone());
        decode(&mut s, &rect(1, 1, 2, 3, ENCODING_RAW), &mut fb)
            .await
            .unwrap();

        let mut stride = 0;
        let rows = fb.get_buffer(Rect::new(1, 1, 2, 3), &mut stride).unwrap();
        let mut out = Vec::new();
        for row in 0..3 {
            out.extend_from_slice(&rows[row * stride * 4..row * stride * 4 + 8]);
        }
        assert_eq!(out, wire);
    }

    #[tokio::test]
    async fn test_decode_palette_bytes() {
        let mut fb = fb8(4, 4);
        let mut s = stream((0u8..16).collect());
        decode(&mut s, &rect(0, 0, 4, 4, ENCODING_RAW), &mut fb)
            .await
            .unwrap();
        assert_eq!(fb.data(), &(0u8..16).collect::<Vec<_>>()[..]);
    }

    #[tokio::test]
    async fn test_decode_insufficient_data() {
        let mut fb = fb32(10, 10);
        let mut s = stream(vec![0; 7]);
        let err = decode(&mut s, &rect(0, 0, 2, 1, ENCODING_RAW), &mut fb)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read raw pixel data"));
    }

    #[tokio::test]
    async fn test_decode_out_of_bounds() {
        let mut fb = fb8(4, 4);
        let mut s = stream(vec![0; 4]);
        let err = decode(&mut s, &rect(3, 0, 2, 2, ENCODING_RAW), &mut fb)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to write raw pixel data"));
    }
}
