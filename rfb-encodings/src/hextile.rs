//! Hextile encoding (type 5).
//!
//! The rectangle is cut into 16x16 tiles in raster order (clipped at the right
//! and bottom edges). Each tile starts with a subencoding byte:
//!
//! | Bit  | Flag              | Meaning                                      |
//! |------|-------------------|----------------------------------------------|
//! | 0x01 | Raw               | tile is raw pixels, all other bits ignored   |
//! | 0x02 | BackgroundSpecified | a background pixel follows                 |
//! | 0x04 | ForegroundSpecified | a foreground pixel follows                 |
//! | 0x08 | AnySubrects       | subrect count and subrects follow            |
//! | 0x10 | SubrectsColoured  | every subrect carries its own pixel          |
//!
//! Background and foreground carry over from tile to tile within one
//! rectangle and restart at the all-zero pixel for every new rectangle. A
//! coloured subrect also becomes the current foreground.

use crate::{read_pixel, MutablePixelBuffer, Rectangle, RfbInStream};
use anyhow::{bail, Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

const TILE_RAW: u8 = 1 << 0;
const TILE_BACKGROUND_SPECIFIED: u8 = 1 << 1;
const TILE_FOREGROUND_SPECIFIED: u8 = 1 << 2;
const TILE_ANY_SUBRECTS: u8 = 1 << 3;
const TILE_SUBRECTS_COLOURED: u8 = 1 << 4;

const TILE_SIZE: u16 = 16;

/// Colours carried across the tiles of one rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HextileTileState {
    pub background: Vec<u8>,
    pub foreground: Vec<u8>,
}

impl HextileTileState {
    fn new(bytes_per_pixel: usize) -> Self {
        Self {
            background: vec![0; bytes_per_pixel],
            foreground: vec![0; bytes_per_pixel],
        }
    }
}

pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let bpp = buffer.pixel_format().bytes_per_pixel() as usize;
    let mut tile_state = HextileTileState::new(bpp);

    let mut ty = 0u16;
    while ty < rect.height {
        let tile_h = TILE_SIZE.min(rect.height - ty);
        let mut tx = 0u16;
        while tx < rect.width {
            let tile_w = TILE_SIZE.min(rect.width - tx);
            let tile = Rect::new(
                i32::from(rect.x) + i32::from(tx),
                i32::from(rect.y) + i32::from(ty),
                u32::from(tile_w),
                u32::from(tile_h),
            );
            decode_tile(stream, tile, &mut tile_state, buffer)
                .await
                .with_context(|| {
                    format!(
                        "Hextile tile ({}, {}) in rect at ({}, {})",
                        tx, ty, rect.x, rect.y
                    )
                })?;
            tx += TILE_SIZE;
        }
        ty += TILE_SIZE;
    }
    Ok(())
}

async fn decode_tile<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    tile: Rect,
    tile_state: &mut HextileTileState,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let bpp = tile_state.background.len();
    let flags = stream
        .read_u8()
        .await
        .context("Failed to read Hextile subencoding")?;

    if flags & TILE_RAW != 0 {
        return crate::raw::decode_into(stream, tile, buffer).await;
    }

    if flags & TILE_BACKGROUND_SPECIFIED != 0 {
        tile_state.background = read_pixel(stream, bpp)
            .await
            .context("Failed to read Hextile background")?;
    }
    buffer
        .fill_rect(tile, &tile_state.background)
        .context("Failed to fill Hextile background")?;

    if flags & TILE_FOREGROUND_SPECIFIED != 0 {
        tile_state.foreground = read_pixel(stream, bpp)
            .await
            .context("Failed to read Hextile foreground")?;
    }

    if flags & TILE_ANY_SUBRECTS == 0 {
        return Ok(());
    }

    let count = stream
        .read_u8()
        .await
        .context("Failed to read Hextile subrect count")?;
    let coloured = flags & TILE_SUBRECTS_COLOURED != 0;

    for i in 0..count {
        if coloured {
            tile_state.foreground = read_pixel(stream, bpp)
                .await
                .with_context(|| format!("Failed to read colour for Hextile subrect {}", i))?;
        }
        let xy = stream
            .read_u8()
            .await
            .with_context(|| format!("Failed to read XY for Hextile subrect {}", i))?;
        let wh = stream
            .read_u8()
            .await
            .with_context(|| format!("Failed to read WH for Hextile subrect {}", i))?;

        let sx = u32::from(xy >> 4);
        let sy = u32::from(xy & 0x0F);
        let sw = u32::from(wh >> 4) + 1;
        let sh = u32::from(wh & 0x0F) + 1;
        if sx + sw > tile.width || sy + sh > tile.height {
            bail!(
                "Hextile subrect {} [{},{} {}x{}] extends beyond {}x{} tile",
                i,
                sx,
                sy,
                sw,
                sh,
                tile.width,
                tile.height
            );
        }

        let sub = Rect::new(tile.x + sx as i32, tile.y + sy as i32, sw, sh);
        buffer
            .fill_rect(sub, &tile_state.foreground)
            .with_context(|| format!("Failed to fill Hextile subrect {}", i))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fb32, fb8, rect, stream};
    use crate::ENCODING_HEXTILE;

    #[tokio::test]
    async fn test_background_carries_to_next_tile() {
        // 32x16: two tiles. First sets bg=7, second specifies nothing.
        let mut fb = fb8(32, 16);
        let mut s = stream(vec![TILE_BACKGROUND_SPECIFIED, 7, 0]);
        decode(&mut s, &rect(0, 0, 32, 16, ENCODING_HEXTILE), &mut fb)
            .await
            .unwrap();
        assert!(fb.data().iter().all(|&p| p == 7));
    }

    #[tokio::test]
    async fn test_subrects_reuse_previous_colours() {
        // Tile 0: bg=1, fg=2, no subrects. Tile 1: only AnySubrects, one 1x1
        // subrect at (0,0) -> must use bg=1 and fg=2 from tile 0.
        let mut fb = fb8(32, 16);
        let data = vec![
            TILE_BACKGROUND_SPECIFIED | TILE_FOREGROUND_SPECIFIED,
            1,
            2,
            TILE_ANY_SUBRECTS,
            1,
            0x00,
            0x00,
        ];
        let mut s = stream(data);
        decode(&mut s, &rect(0, 0, 32, 16, ENCODING_HEXTILE), &mut fb)
            .await
            .unwrap();
        assert_eq!(fb.pixel(16, 0).unwrap(), &[2]);
        assert_eq!(fb.pixel(17, 0).unwrap(), &[1]);
        assert_eq!(fb.pixel(0, 0).unwrap(), &[1]);
    }

    #[tokio::test]
    async fn test_state_resets_between_rectangles() {
        let mut fb = fb8(16, 32);
        // First rectangle sets bg=9.
        let mut s = stream(vec![TILE_BACKGROUND_SPECIFIED, 9]);
        decode(&mut s, &rect(0, 0, 16, 16, ENCODING_HEXTILE), &mut fb)
            .await
            .unwrap();
        // Second rectangle's first tile specifies nothing: zero background.
        let mut s = stream(vec![0]);
        decode(&mut s, &rect(0, 16, 16, 16, ENCODING_HEXTILE), &mut fb)
            .await
            .unwrap();
        assert_eq!(fb.pixel(0, 0).unwrap(), &[9]);
        assert_eq!(fb.pixel(0, 16).unwrap(), &[0]);
        assert_eq!(fb.pixel(15, 31).unwrap(), &[0]);
    }

    #[tokio::test]
    async fn test_raw_tile_and_edge_clipping() {
        // 18x1 rectangle: tile 0 is 16x1 raw, tile 1 is 2x1 raw.
        let mut fb = fb8(18, 1);
        let mut data = vec![TILE_RAW];
        data.extend(0u8..16);
        data.push(TILE_RAW);
        data.extend([100, 101]);
        let mut s = stream(data);
        decode(&mut s, &rect(0, 0, 18, 1, ENCODING_HEXTILE), &mut fb)
            .await
            .unwrap();
        assert_eq!(fb.pixel(15, 0).unwrap(), &[15]);
        assert_eq!(fb.pixel(17, 0).unwrap(), &[101]);
    }

    #[tokio::test]
    async fn test_coloured_subrects_update_foreground() {
        // Tile 0: coloured subrect with colour 5. Tile 1: plain subrect, no fg
        // byte -> inherits 5 from the coloured subrect.
        let mut fb = fb32(32, 16);
        let mut data = vec![
            TILE_ANY_SUBRECTS | TILE_SUBRECTS_COLOURED,
            1,
        ];
        data.extend([5, 5, 5, 0, 0x00, 0x00]);
        data.extend([TILE_ANY_SUBRECTS, 1, 0x11, 0x00]);
        let mut s = stream(data);
        decode(&mut s, &rect(0, 0, 32, 16, ENCODING_HEXTILE), &mut fb)
            .await
            .unwrap();
        assert_eq!(fb.pixel(0, 0).unwrap(), &[5, 5, 5, 0]);
        assert_eq!(fb.pixel(17, 1).unwrap(), &[5, 5, 5, 0]);
        assert_eq!(fb.pixel(16, 0).unwrap(), &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_subrect_beyond_clipped_tile() {
        // 4x4 rect: a 5-wide subrect cannot fit.
        let mut fb = fb8(4, 4);
        let mut s = stream(vec![TILE_ANY_SUBRECTS, 1, 0x00, 0x40]);
        let err = decode(&mut s, &rect(0, 0, 4, 4, ENCODING_HEXTILE), &mut fb)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("extends beyond"));
    }
}
