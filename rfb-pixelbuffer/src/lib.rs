//! RFB pixel buffer types and utilities.
//!
//! This crate provides the pixel formats negotiated with the server and the
//! framebuffer that decoders write into.

pub mod buffer;
pub mod format;
pub mod store;

pub use buffer::{MutablePixelBuffer, PixelBuffer};
pub use format::{PixelFormat, Rgb};
pub use store::FramebufferStore;
