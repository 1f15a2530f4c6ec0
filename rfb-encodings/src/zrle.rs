//! ZRLE encoding (type 16).
//!
//! ```text
//! compressed_len: u32        (rejected above the configured ceiling, 64 MiB by default)
//! zlib data:      compressed_len bytes of the session's ZRLE stream
//! ```
//!
//! The whole payload is inflated at once, then consumed as 64x64 tiles in
//! raster order. Each tile starts with a mode byte: bit 7 is the RLE flag, the
//! low seven bits are the palette size.
//!
//! | Palette | RLE | Tile body                                               |
//! |---------|-----|---------------------------------------------------------|
//! | 1       | any | one CPIXEL, fills the tile                              |
//! | 0       | no  | `w*h` CPIXELs                                           |
//! | 0       | yes | runs of (CPIXEL, run length)                            |
//! | 2-127   | no  | palette, then 1/2/4/8-bit packed indices, rows byte aligned |
//! | 2-127   | yes | palette, then index bytes; top bit set means a run length follows |
//!
//! Run lengths are `1 + sum(bytes)`, continuing while a byte equals 255.
//!
//! CPIXEL is a compressed pixel: for a 32bpp format whose colours fit in three
//! bytes it carries only those three bytes (the low three for little-endian,
//! the high three for big-endian); otherwise it is a full pixel.

use crate::bit_cursor::BitCursor;
use crate::zlib_pool::{OutputSize, StreamId};
use crate::{DecoderState, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream};
use anyhow::{bail, Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

const TILE_SIZE: u16 = 64;

pub async fn decode<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    rect: &Rectangle,
    state: &mut DecoderState,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let compressed_len = stream
        .read_u32()
        .await
        .context("ZRLE: failed to read compressed data length")? as usize;
    if compressed_len > state.settings.max_zrle_length {
        bail!(
            "ZRLE: illegal compressed data size {} (limit {})",
            compressed_len,
            state.settings.max_zrle_length
        );
    }
    let compressed = stream
        .read_vec(compressed_len)
        .await
        .context("ZRLE: failed to read compressed data")?;

    let format = *buffer.pixel_format();
    let limit = max_inflated_len(rect, CPixel::for_format(&format).wire_len);
    let inflated = state
        .zlib
        .inflate(StreamId::Zrle, &compressed, OutputSize::AtMost(limit))?;
    tracing::trace!("ZRLE: inflated {} -> {} bytes", compressed_len, inflated.len());

    let mut cursor = DataCursor::new(&inflated);
    decode_tiles(&mut cursor, rect, &format, buffer)?;

    if cursor.remaining() > 0 {
        bail!(
            "ZRLE: {} trailing bytes after decoding rectangle",
            cursor.remaining()
        );
    }
    Ok(())
}

/// Largest payload a valid rectangle can inflate to: per tile a mode byte
/// and up to 127 palette entries, then at most one CPIXEL plus one run byte
/// per pixel.
fn max_inflated_len(rect: &Rectangle, cpixel_len: usize) -> usize {
    let tiles_x = usize::from(rect.width).div_ceil(usize::from(TILE_SIZE));
    let tiles_y = usize::from(rect.height).div_ceil(usize::from(TILE_SIZE));
    let pixels = usize::from(rect.width) * usize::from(rect.height);
    tiles_x * tiles_y * (1 + 127 * cpixel_len) + pixels * (cpixel_len + 1)
}

fn decode_tiles(
    cursor: &mut DataCursor,
    rect: &Rectangle,
    format: &PixelFormat,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let cpixel = CPixel::for_format(format);

    let mut ty = 0u16;
    while ty < rect.height {
        let tile_h = TILE_SIZE.min(rect.height - ty);
        let mut tx = 0u16;
        while tx < rect.width {
            let tile_w = TILE_SIZE.min(rect.width - tx);
            let pixels = decode_tile(cursor, usize::from(tile_w), usize::from(tile_h), &cpixel)
                .with_context(|| {
                    format!(
                        "ZRLE: failed to decode tile at ({}, {}) size {}x{}",
                        tx, ty, tile_w, tile_h
                    )
                })?;
            let dest = Rect::new(
                i32::from(rect.x) + i32::from(tx),
                i32::from(rect.y) + i32::from(ty),
                u32::from(tile_w),
                u32::from(tile_h),
            );
            buffer
                .image_rect(dest, &pixels, 0)
                .context("ZRLE: failed to write tile")?;
            tx += TILE_SIZE;
        }
        ty += TILE_SIZE;
    }
    Ok(())
}

/// Decode one tile into tightly packed native pixels.
fn decode_tile(cursor: &mut DataCursor, w: usize, h: usize, cpixel: &CPixel) -> Result<Vec<u8>> {
    let mode = cursor.read_u8().context("failed to read subencoding byte")?;
    let rle = mode & 0x80 != 0;
    let pal_size = usize::from(mode & 0x7F);
    let bpp = cpixel.native_len;
    let count = w * h;

    let palette: Vec<Vec<u8>> = (0..pal_size)
        .map(|_| cpixel.read(cursor))
        .collect::<Result<_>>()
        .context("failed to read palette")?;

    let mut out = Vec::with_capacity(count * bpp);
    match (pal_size, rle) {
        (1, _) => {
            for _ in 0..count {
                out.extend_from_slice(&palette[0]);
            }
        }
        (0, false) => {
            for _ in 0..count {
                out.extend_from_slice(&cpixel.read(cursor)?);
            }
        }
        (0, true) => {
            let mut filled = 0;
            while filled < count {
                let pixel = cpixel.read(cursor)?;
                let len = read_run_length(cursor)?;
                if len > count - filled {
                    bail!("run of {} overflows tile ({} pixels left)", len, count - filled);
                }
                for _ in 0..len {
                    out.extend_from_slice(&pixel);
                }
                filled += len;
            }
        }
        (_, false) => {
            let bits = BitCursor::bits_for_palette(pal_size);
            let packed_len = BitCursor::row_bytes(w, bits) * h;
            let packed = cursor.read_exact(packed_len)?;
            let mut indices = BitCursor::new(packed, bits)?;
            for _ in 0..h {
                for _ in 0..w {
                    let idx = usize::from(indices.read()?);
                    let entry = palette.get(idx).with_context(|| {
                        format!("palette index {} out of range (size {})", idx, pal_size)
                    })?;
                    out.extend_from_slice(entry);
                }
                indices.end_row();
            }
        }
        (_, true) => {
            let mut filled = 0;
            while filled < count {
                let code = cursor.read_u8()?;
                let idx = usize::from(code & 0x7F);
                let len = if code & 0x80 != 0 {
                    read_run_length(cursor)?
                } else {
                    1
                };
                if len > count - filled {
                    bail!("run of {} overflows tile ({} pixels left)", len, count - filled);
                }
                let entry = palette.get(idx).with_context(|| {
                    format!("palette index {} out of range (size {})", idx, pal_size)
                })?;
                for _ in 0..len {
                    out.extend_from_slice(entry);
                }
                filled += len;
            }
        }
    }
    Ok(out)
}

/// `1 + b0 + b1 + ...`, continuing while a byte equals 255.
fn read_run_length(cursor: &mut DataCursor) -> Result<usize> {
    let mut len = 1usize;
    loop {
        let b = cursor.read_u8().context("failed to read run length")?;
        len = len
            .checked_add(usize::from(b))
            .context("run length overflows")?;
        if b != 255 {
            return Ok(len);
        }
    }
}

/// Cursor over the inflated payload.
struct DataCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        let Some(&val) = self.data.get(self.pos) else {
            bail!("cursor EOF: need 1 byte, have 0");
        };
        self.pos += 1;
        Ok(val)
    }

    fn read_exact(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            bail!(
                "cursor EOF: need {} bytes, have {}",
                count,
                self.remaining()
            );
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }
}

/// How CPIXELs map onto native pixels.
struct CPixel {
    wire_len: usize,
    native_len: usize,
    /// Offset of the wire bytes inside the native pixel.
    offset: usize,
}

impl CPixel {
    fn for_format(format: &PixelFormat) -> Self {
        let native_len = format.bytes_per_pixel() as usize;
        if native_len == 4 && format.depth <= 24 {
            let max_value = (u32::from(format.red_max) << format.red_shift)
                | (u32::from(format.green_max) << format.green_shift)
                | (u32::from(format.blue_max) << format.blue_shift);
            let fits_low = max_value < (1 << 24);
            let fits_high = max_value & 0xFF == 0;
            if fits_low && !format.big_endian {
                return Self {
                    wire_len: 3,
                    native_len,
                    offset: 0,
                };
            }
            if fits_high && format.big_endian {
                return Self {
                    wire_len: 3,
                    native_len,
                    offset: 1,
                };
            }
        }
        Self {
            wire_len: native_len,
            native_len,
            offset: 0,
        }
    }

    fn read(&self, cursor: &mut DataCursor) -> Result<Vec<u8>> {
        let bytes = cursor.read_exact(self.wire_len)?;
        let mut pixel = vec![0u8; self.native_len];
        pixel[self.offset..self.offset + self.wire_len].copy_from_slice(bytes);
        Ok(pixel)
    }
}
