//! Pixel buffer traits.
//!
//! - [`PixelBuffer`]: read-only access to pixel data
//! - [`MutablePixelBuffer`]: bounds-checked rendering operations used by decoders
//!
//! Strides are measured in **pixels**, not bytes:
//!
//! ```text
//! byte_offset = (y * stride + x) * bytes_per_pixel
//! ```

use crate::PixelFormat;
use anyhow::Result;
use rfb_common::{Point, Rect};

/// Read-only view of a pixel buffer.
pub trait PixelBuffer {
    /// Buffer size as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    fn pixel_format(&self) -> &PixelFormat;

    /// Borrow the rows covering `rect`.
    ///
    /// On success `stride` is set to the row stride in pixels and the returned
    /// slice starts at the top-left pixel of `rect`. Returns `None` when the
    /// rectangle is out of bounds.
    fn get_buffer(&self, rect: Rect, stride: &mut usize) -> Option<&[u8]>;
}

/// Rendering operations. Every operation validates its rectangle against the
/// buffer bounds and fails instead of clipping.
///
/// `Send` so that a decode in progress can live inside a spawned task.
pub trait MutablePixelBuffer: PixelBuffer + Send {
    /// Fill `rect` with a single pixel in the buffer's byte layout.
    fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()>;

    /// Copy the `dest.width x dest.height` block at `src` onto `dest`.
    ///
    /// Source and destination may overlap arbitrarily; the result is as if the
    /// whole source block were read before any destination pixel is written.
    fn copy_rect(&mut self, dest: Rect, src: Point) -> Result<()>;

    /// Copy external pixel rows into `dest`. A `stride` of 0 means the rows are
    /// tightly packed (`stride == dest.width`).
    fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()>;
}
