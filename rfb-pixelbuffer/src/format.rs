//! Pixel formats understood by the decode pipeline.
//!
//! The pipeline negotiates exactly one of two formats with the server via
//! `SetPixelFormat`:
//!
//! - **8-bit BGR233**: one byte per pixel, red in bits 0-2, green in bits 3-5,
//!   blue in bits 6-7. The byte doubles as an index into a fixed 256-entry
//!   colour table (see [`PixelFormat::colour_table`]).
//! - **32-bit truecolour**: four bytes per pixel, little-endian
//!   `0x00RRGGBB`, i.e. the wire bytes are `B, G, R, pad`.
//!
//! Framebuffer memory holds pixels in the negotiated byte layout, so decoders
//! copy wire pixels straight through. Conversion to ARGB only happens at the
//! presentation boundary.
//!
//! # Example
//!
//! ```
//! use rfb_pixelbuffer::PixelFormat;
//!
//! let pf = PixelFormat::rgb888();
//! assert_eq!(pf.bytes_per_pixel(), 4);
//! assert_eq!(pf.pixel_from_rgb(0x11, 0x22, 0x33), vec![0x33, 0x22, 0x11, 0x00]);
//! assert_eq!(pf.to_argb(&[0x33, 0x22, 0x11, 0x00]), 0xFF11_2233);
//! ```

use anyhow::{bail, Result};

/// An RGB triple as stored in the 8-bit colour table.
pub type Rgb = [u8; 3];

/// Description of how pixels are laid out in memory and on the wire.
///
/// Field meanings follow the RFB `PIXEL_FORMAT` structure: a channel value is
/// `(pixel >> shift) & max`.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Bytes per pixel, rounding partial bytes up.
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bits_per_pixel.div_ceil(8)
    }

    /// 32bpp little-endian truecolour, `B,G,R,pad` on the wire.
    pub fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// 8bpp BGR233, used as a fixed palette.
    pub fn bgr233() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_color: true,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        }
    }

    /// Pick the format for a configured pixel depth (8 or 32).
    pub fn for_depth(depth: u8) -> Result<Self> {
        match depth {
            8 => Ok(Self::bgr233()),
            32 => Ok(Self::rgb888()),
            other => bail!("Unsupported pixel depth {} (expected 8 or 32)", other),
        }
    }

    /// True for the 8-bit palette format.
    pub fn is_palette(&self) -> bool {
        self.bits_per_pixel == 8
    }

    pub fn is_rgb888(&self) -> bool {
        *self == Self::rgb888()
    }

    /// The fixed 256-entry colour table for the 8-bit format.
    ///
    /// Returns `None` for truecolour formats.
    pub fn colour_table(&self) -> Option<[Rgb; 256]> {
        if !self.is_palette() {
            return None;
        }
        let mut table = [[0u8; 3]; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let v = i as u32;
            *entry = [
                self.scale_up(v >> self.red_shift, self.red_max),
                self.scale_up(v >> self.green_shift, self.green_max),
                self.scale_up(v >> self.blue_shift, self.blue_max),
            ];
        }
        Some(table)
    }

    fn scale_up(&self, value: u32, max: u16) -> u8 {
        let max = u32::from(max.max(1));
        ((value & max) * 255 / max) as u8
    }

    fn scale_down(value: u8, max: u16) -> u32 {
        u32::from(value) * u32::from(max) / 255
    }

    /// Assemble a pixel value from its byte representation.
    pub fn pixel_value(&self, pixel: &[u8]) -> u32 {
        let bpp = (self.bytes_per_pixel() as usize).min(pixel.len()).min(4);
        let bytes = &pixel[..bpp];
        if self.big_endian {
            bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
        } else {
            bytes
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (i * 8)))
        }
    }

    /// Split a value into bytes in this format's byte order.
    pub fn value_to_bytes(&self, mut value: u32) -> Vec<u8> {
        let bpp = self.bytes_per_pixel() as usize;
        let mut out = vec![0u8; bpp];
        if self.big_endian {
            for slot in out.iter_mut().rev() {
                *slot = (value & 0xFF) as u8;
                value >>= 8;
            }
        } else {
            for slot in out.iter_mut() {
                *slot = (value & 0xFF) as u8;
                value >>= 8;
            }
        }
        out
    }

    /// Pack an 8-bit-per-channel colour into this format's byte layout.
    pub fn pixel_from_rgb(&self, r: u8, g: u8, b: u8) -> Vec<u8> {
        let value = (Self::scale_down(r, self.red_max) << self.red_shift)
            | (Self::scale_down(g, self.green_max) << self.green_shift)
            | (Self::scale_down(b, self.blue_max) << self.blue_shift);
        self.value_to_bytes(value)
    }

    /// Convert a stored pixel into `[r, g, b]`.
    pub fn to_rgb(&self, pixel: &[u8]) -> Rgb {
        let value = self.pixel_value(pixel);
        [
            self.scale_up(value >> self.red_shift, self.red_max),
            self.scale_up(value >> self.green_shift, self.green_max),
            self.scale_up(value >> self.blue_shift, self.blue_max),
        ]
    }

    /// Convert a stored pixel into opaque `0xAARRGGBB`.
    pub fn to_argb(&self, pixel: &[u8]) -> u32 {
        let [r, g, b] = self.to_rgb(pixel);
        0xFF00_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgb888()
    }
}

impl From<rfb_protocol::messages::types::PixelFormat> for PixelFormat {
    fn from(pf: rfb_protocol::messages::types::PixelFormat) -> Self {
        Self {
            bits_per_pixel: pf.bits_per_pixel,
            depth: pf.depth,
            big_endian: pf.big_endian != 0,
            true_color: pf.true_color != 0,
            red_max: pf.red_max,
            green_max: pf.green_max,
            blue_max: pf.blue_max,
            red_shift: pf.red_shift,
            green_shift: pf.green_shift,
            blue_shift: pf.blue_shift,
        }
    }
}

impl From<PixelFormat> for rfb_protocol::messages::types::PixelFormat {
    fn from(pf: PixelFormat) -> Self {
        Self {
            bits_per_pixel: pf.bits_per_pixel,
            depth: pf.depth,
            big_endian: u8::from(pf.big_endian),
            true_color: u8::from(pf.true_color),
            red_max: pf.red_max,
            green_max: pf.green_max,
            blue_max: pf.blue_max,
            red_shift: pf.red_shift,
            green_shift: pf.green_shift,
            blue_shift: pf.blue_shift,
        }
    }
}
