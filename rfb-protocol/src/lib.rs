//! RFB (Remote Framebuffer) wire layer for the update pipeline.
//!
//! This crate provides the buffered reader/writer used by every decoder and
//! the handful of messages the pipeline exchanges once a session is running.
//! Transport setup and the handshake happen elsewhere; this crate only needs
//! an [`tokio::io::AsyncRead`] / [`tokio::io::AsyncWrite`] pair.
//!
//! # Modules
//!
//! - [`io`] - Buffered I/O streams (RfbInStream, RfbOutStream)
//! - [`messages`] - Wire messages and encoding ids

pub mod io;
pub mod messages;

pub use io::{RfbInStream, RfbOutStream};
pub use messages::ServerMessageType;
