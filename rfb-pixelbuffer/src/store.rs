//! The framebuffer owned by the decode pipeline.
//!
//! [`FramebufferStore`] keeps `width * height` pixels in the negotiated
//! [`PixelFormat`] byte layout. Presentation code only ever sees it through a
//! read-only borrow or an ARGB snapshot.
//!
//! # Example
//!
//! ```
//! use rfb_pixelbuffer::{FramebufferStore, PixelFormat, MutablePixelBuffer, PixelBuffer};
//! use rfb_common::Rect;
//!
//! let mut fb = FramebufferStore::new(100, 100, PixelFormat::rgb888());
//! let red = fb.pixel_format().pixel_from_rgb(255, 0, 0);
//! fb.fill_rect(Rect::new(10, 10, 50, 50), &red).unwrap();
//! assert_eq!(fb.dimensions(), (100, 100));
//! assert!(fb.fill_rect(Rect::new(90, 90, 20, 20), &red).is_err());
//! ```

use crate::{MutablePixelBuffer, PixelBuffer, PixelFormat};
use anyhow::{anyhow, Result};
use rfb_common::{Point, Rect};

#[derive(Debug, Clone)]
pub struct FramebufferStore {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl FramebufferStore {
    /// Create a zero-filled framebuffer.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = Self::byte_len(width, height, &format);
        Self {
            width,
            height,
            format,
            data: vec![0u8; len],
        }
    }

    fn byte_len(width: u32, height: u32, format: &PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel() as usize
    }

    /// Reallocate for a new geometry. Contents are cleared.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data = vec![0u8; Self::byte_len(width, height, &self.format)];
    }

    /// Switch pixel format. Contents are cleared since old bytes are meaningless
    /// in the new layout.
    pub fn set_format(&mut self, format: PixelFormat) {
        self.format = format;
        self.data = vec![0u8; Self::byte_len(self.width, self.height, &format)];
    }

    pub fn stride(&self) -> usize {
        self.width as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    /// The bytes of a single pixel, if in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel() as usize;
        let offset = (y as usize * self.stride() + x as usize) * bpp;
        Some(&self.data[offset..offset + bpp])
    }

    /// Copy `rect` out of `other` into the same location here.
    ///
    /// Used to publish a finished update from a working buffer. Both buffers
    /// must share geometry and format.
    pub fn copy_region_from(&mut self, other: &FramebufferStore, rect: Rect) -> Result<()> {
        if other.dimensions() != self.dimensions() || other.format != self.format {
            return Err(anyhow!(
                "Cannot copy between mismatched buffers: {}x{} vs {}x{}",
                other.width,
                other.height,
                self.width,
                self.height
            ));
        }
        let mut stride = 0;
        let rows = other
            .get_buffer(rect, &mut stride)
            .ok_or_else(|| anyhow!("Rectangle out of bounds: {:?}", rect))?;
        self.image_rect(rect, rows, stride)
    }

    /// ARGB rendition of the whole buffer, row-major.
    pub fn to_argb(&self) -> Vec<u32> {
        let bpp = self.format.bytes_per_pixel() as usize;
        self.data
            .chunks_exact(bpp)
            .map(|px| self.format.to_argb(px))
            .collect()
    }

    fn validate_rect(&self, rect: Rect) -> Result<()> {
        let in_bounds = rect.x >= 0
            && rect.y >= 0
            && rect.x as u64 + u64::from(rect.width) <= u64::from(self.width)
            && rect.y as u64 + u64::from(rect.height) <= u64::from(self.height);
        if !in_bounds {
            return Err(anyhow!(
                "Rectangle out of bounds: {:?} (buffer size: {}x{})",
                rect,
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    fn offset_of(&self, x: i32, y: i32) -> usize {
        (y as usize * self.stride() + x as usize) * self.format.bytes_per_pixel() as usize
    }
}

impl PixelBuffer for FramebufferStore {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    fn get_buffer(&self, rect: Rect, stride: &mut usize) -> Option<&[u8]> {
        self.validate_rect(rect).ok()?;
        *stride = self.stride();
        if rect.is_empty() {
            return Some(&[]);
        }
        let bpp = self.format.bytes_per_pixel() as usize;
        let start = self.offset_of(rect.x, rect.y);
        let len = ((rect.height as usize - 1) * self.stride() + rect.width as usize) * bpp;
        Some(&self.data[start..start + len])
    }
}

impl MutablePixelBuffer for FramebufferStore {
    fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()> {
        self.validate_rect(rect)?;

        let bpp = self.format.bytes_per_pixel() as usize;
        if pixel.len() != bpp {
            return Err(anyhow!(
                "Invalid pixel size: got {} bytes, expected {}",
                pixel.len(),
                bpp
            ));
        }

        for row in 0..rect.height as i32 {
            let start = self.offset_of(rect.x, rect.y + row);
            let end = start + rect.width as usize * bpp;
            for dst in self.data[start..end].chunks_exact_mut(bpp) {
                dst.copy_from_slice(pixel);
            }
        }
        Ok(())
    }

    fn copy_rect(&mut self, dest: Rect, src: Point) -> Result<()> {
        self.validate_rect(dest)?;
        let src_rect = Rect::new(src.x, src.y, dest.width, dest.height);
        self.validate_rect(src_rect)?;

        if dest.is_empty() || (src.x == dest.x && src.y == dest.y) {
            return Ok(());
        }

        // Snapshot the source block first so overlap can never feed written
        // pixels back into later reads.
        let bpp = self.format.bytes_per_pixel() as usize;
        let row_bytes = dest.width as usize * bpp;
        let mut block = Vec::with_capacity(row_bytes * dest.height as usize);
        for row in 0..dest.height as i32 {
            let start = self.offset_of(src.x, src.y + row);
            block.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        self.image_rect(dest, &block, 0)
    }

    fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()> {
        self.validate_rect(dest)?;
        if dest.is_empty() {
            return Ok(());
        }

        let bpp = self.format.bytes_per_pixel() as usize;
        let row_bytes = dest.width as usize * bpp;
        let src_stride = if stride == 0 { dest.width as usize } else { stride };
        let src_stride_bytes = src_stride * bpp;

        let required = src_stride_bytes * (dest.height as usize - 1) + row_bytes;
        if pixels.len() < required {
            return Err(anyhow!(
                "Insufficient source data: got {} bytes, need at least {}",
                pixels.len(),
                required
            ));
        }

        for row in 0..dest.height as usize {
            let dst = self.offset_of(dest.x, dest.y + row as i32);
            let src = row * src_stride_bytes;
            self.data[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
        Ok(())
    }
}
