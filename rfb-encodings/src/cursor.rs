//! Cursor shape pseudo-encodings and the local cursor overlay.
//!
//! The server can ship the pointer's shape instead of drawing it into the
//! framebuffer. The shape is decoded into a standalone ARGB bitmap that is
//! composited at paint time and never written into the framebuffer.
//!
//! ```text
//! XCursor (-240):    fg r,g,b | bg r,g,b | pixel plane | mask plane
//! RichCursor (-239): w*h native pixels   | mask plane
//! ```
//!
//! Bit planes are `ceil(w/8)` bytes per row, most significant bit first. A
//! mask bit of 0 is transparent. The header's x/y carry the hotspot.

use crate::bit_cursor::{unpack_bitmap, BitCursor};
use crate::{CursorEncoding, DecoderSettings, PixelFormat, Rectangle, RfbInStream};
use anyhow::{Context, Result};
use rfb_common::{Point, Rect};
use tokio::io::AsyncRead;

/// A decoded cursor bitmap, `0xAARRGGBB` row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorShape {
    pub width: u32,
    pub height: u32,
    pub hotspot_x: u32,
    pub hotspot_y: u32,
    pub argb: Vec<u32>,
}

impl CursorShape {
    /// Nearest-neighbour resize; hotspot follows. 100 is the identity.
    pub fn scaled(&self, percent: u32) -> CursorShape {
        if percent == 100 {
            return self.clone();
        }
        let scale = |v: u32| ((u64::from(v) * u64::from(percent) + 50) / 100) as u32;
        let width = scale(self.width).max(1);
        let height = scale(self.height).max(1);

        let mut argb = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            let sy = (u64::from(y) * u64::from(self.height) / u64::from(height)) as u32;
            for x in 0..width {
                let sx = (u64::from(x) * u64::from(self.width) / u64::from(width)) as u32;
                argb.push(self.argb[(sy * self.width + sx) as usize]);
            }
        }

        CursorShape {
            width,
            height,
            hotspot_x: scale(self.hotspot_x).min(width - 1),
            hotspot_y: scale(self.hotspot_y).min(height - 1),
            argb,
        }
    }
}

/// Result of a cursor shape rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorUpdate {
    Shape(CursorShape),
    Hidden,
}

/// Decode a cursor shape rectangle.
///
/// With `ignore_cursor_updates` set the payload is skipped and the local
/// cursor stays hidden.
pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    kind: CursorEncoding,
    format: &PixelFormat,
    settings: &DecoderSettings,
) -> Result<CursorUpdate> {
    let w = usize::from(rect.width);
    let h = usize::from(rect.height);
    if w * h == 0 {
        return Ok(CursorUpdate::Hidden);
    }

    let mask_len = BitCursor::row_bytes(w, 1) * h;
    let body_len = match kind {
        CursorEncoding::XCursor => 6 + 2 * mask_len,
        CursorEncoding::RichCursor => w * h * format.bytes_per_pixel() as usize + mask_len,
    };

    if settings.ignore_cursor_updates {
        stream
            .skip(body_len)
            .await
            .context("Failed to skip cursor shape")?;
        return Ok(CursorUpdate::Hidden);
    }

    let body = stream
        .read_vec(body_len)
        .await
        .context("Failed to read cursor shape")?;

    let argb = match kind {
        CursorEncoding::XCursor => {
            let fg = 0xFF00_0000 | rgb(&body[0..3]);
            let bg = 0xFF00_0000 | rgb(&body[3..6]);
            let pixels = unpack_bitmap(&body[6..6 + mask_len], w, h)?;
            let mask = unpack_bitmap(&body[6 + mask_len..], w, h)?;
            pixels
                .iter()
                .zip(&mask)
                .map(|(&set, &visible)| match (visible, set) {
                    (false, _) => 0,
                    (true, true) => fg,
                    (true, false) => bg,
                })
                .collect()
        }
        CursorEncoding::RichCursor => {
            let bpp = format.bytes_per_pixel() as usize;
            let (pixels, mask_bytes) = body.split_at(w * h * bpp);
            let mask = unpack_bitmap(mask_bytes, w, h)?;
            pixels
                .chunks_exact(bpp)
                .zip(&mask)
                .map(|(px, &visible)| if visible { format.to_argb(px) } else { 0 })
                .collect()
        }
    };

    let shape = CursorShape {
        width: u32::from(rect.width),
        height: u32::from(rect.height),
        hotspot_x: u32::from(rect.x),
        hotspot_y: u32::from(rect.y),
        argb,
    };
    tracing::debug!(
        "cursor shape {}x{} hotspot ({}, {})",
        shape.width,
        shape.height,
        shape.hotspot_x,
        shape.hotspot_y
    );
    Ok(CursorUpdate::Shape(
        shape.scaled(settings.cursor_scale_percent),
    ))
}

fn rgb(bytes: &[u8]) -> u32 {
    (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
}

/// Locally drawn cursor: current shape plus pointer position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorOverlay {
    pub shape: Option<CursorShape>,
    pub position: Point,
}

impl CursorOverlay {
    pub fn apply(&mut self, update: CursorUpdate) {
        self.shape = match update {
            CursorUpdate::Shape(shape) => Some(shape),
            CursorUpdate::Hidden => None,
        };
    }

    pub fn move_to(&mut self, position: Point) {
        self.position = position;
    }

    /// Screen area covered by the cursor, if one is shown.
    pub fn bounds(&self) -> Option<Rect> {
        let shape = self.shape.as_ref()?;
        Some(Rect::new(
            self.position.x - shape.hotspot_x as i32,
            self.position.y - shape.hotspot_y as i32,
            shape.width,
            shape.height,
        ))
    }

    /// Draw the cursor over an ARGB frame of `width` x `height`, clipping at
    /// the frame's edges. Fully transparent pixels are skipped.
    pub fn composite(&self, frame: &mut [u32], width: u32, height: u32) {
        let (Some(shape), Some(bounds)) = (self.shape.as_ref(), self.bounds()) else {
            return;
        };
        for cy in 0..shape.height as i32 {
            let fy = bounds.y + cy;
            if fy < 0 || fy >= height as i32 {
                continue;
            }
            for cx in 0..shape.width as i32 {
                let fx = bounds.x + cx;
                if fx < 0 || fx >= width as i32 {
                    continue;
                }
                let px = shape.argb[(cy as u32 * shape.width + cx as u32) as usize];
                if px >> 24 != 0 {
                    frame[(fy as u32 * width + fx as u32) as usize] = px;
                }
            }
        }
    }
}
