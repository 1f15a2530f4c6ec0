//! Reader for bit-packed palette indices.
//!
//! ZRLE packed palettes, Tight two-colour rectangles and cursor bitmaps all
//! pack 1, 2, 4 or 8 bit indices MSB-first, with every row starting on a fresh
//! byte. [`BitCursor`] walks such data row by row.

use anyhow::{bail, Result};

pub struct BitCursor<'a> {
    data: &'a [u8],
    pos: usize,
    bits: u8,
    current: u8,
    left: u8,
}

impl<'a> BitCursor<'a> {
    /// `bits` must be 1, 2, 4 or 8.
    pub fn new(data: &'a [u8], bits: u8) -> Result<Self> {
        if !matches!(bits, 1 | 2 | 4 | 8) {
            bail!("Unsupported index width: {} bits", bits);
        }
        Ok(Self {
            data,
            pos: 0,
            bits,
            current: 0,
            left: 0,
        })
    }

    /// Index width needed for a palette of `size` entries.
    pub fn bits_for_palette(size: usize) -> u8 {
        match size {
            0..=2 => 1,
            3..=4 => 2,
            5..=16 => 4,
            _ => 8,
        }
    }

    /// Bytes taken by one row of `width` indices of `bits` each.
    pub fn row_bytes(width: usize, bits: u8) -> usize {
        (width * bits as usize).div_ceil(8)
    }

    /// Read the next index.
    pub fn read(&mut self) -> Result<u8> {
        if self.left == 0 {
            let Some(&byte) = self.data.get(self.pos) else {
                bail!("Packed index data exhausted at byte {}", self.pos);
            };
            self.current = byte;
            self.pos += 1;
            self.left = 8;
        }
        self.left -= self.bits;
        let mask = ((1u16 << self.bits) - 1) as u8;
        Ok((self.current >> self.left) & mask)
    }

    /// Drop any bits left in the current byte so the next row starts aligned.
    pub fn end_row(&mut self) {
        self.left = 0;
    }

    /// Bytes consumed so far, counting a partially read byte.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Expand a 1-bit-per-pixel bitmap (`ceil(w/8)` bytes per row, MSB first)
/// into one `bool` per pixel.
pub fn unpack_bitmap(data: &[u8], width: usize, height: usize) -> Result<Vec<bool>> {
    let mut cursor = BitCursor::new(data, 1)?;
    let mut out = Vec::with_capacity(width * height);
    for _ in 0..height {
        for _ in 0..width {
            out.push(cursor.read()? != 0);
        }
        cursor.end_row();
    }
    Ok(out)
}
