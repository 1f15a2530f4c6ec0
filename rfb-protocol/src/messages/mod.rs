//! RFB protocol message types.
//!
//! - **Core types** ([`types`]) - PixelFormat, Rectangle and encoding ids
//! - **Server messages** ([`server`]) - what the update pipeline reads
//! - **Client messages** ([`client`]) - what the update pipeline sends
//!
//! All multi-byte integers are big-endian. Boolean fields must be exactly 0
//! or 1, and invalid data is an error rather than something to work around.

pub mod client;
pub mod server;
pub mod types;

pub use types::{
    PixelFormat, Rectangle, ENCODING_COPYRECT, ENCODING_CORRE, ENCODING_HEXTILE, ENCODING_RAW,
    ENCODING_RRE, ENCODING_TIGHT, ENCODING_ZLIB, ENCODING_ZRLE, PSEUDO_ENCODING_COMPRESS_LEVEL_0,
    PSEUDO_ENCODING_LAST_RECT, PSEUDO_ENCODING_NEW_FB_SIZE, PSEUDO_ENCODING_POINTER_POS,
    PSEUDO_ENCODING_QUALITY_LEVEL_0, PSEUDO_ENCODING_RICH_CURSOR, PSEUDO_ENCODING_XCURSOR,
};

pub use server::{FramebufferUpdateHeader, ServerCutText};

pub use client::{FramebufferUpdateRequest, SetEncodings, SetPixelFormat};

use crate::io::RfbInStream;
use tokio::io::AsyncRead;

/// Kinds of server-to-client message, keyed by the leading type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessageType {
    FramebufferUpdate,
    SetColourMapEntries,
    Bell,
    ServerCutText,
}

impl TryFrom<u8> for ServerMessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            server::MSG_FRAMEBUFFER_UPDATE => Ok(Self::FramebufferUpdate),
            server::MSG_SET_COLOUR_MAP_ENTRIES => Ok(Self::SetColourMapEntries),
            server::MSG_BELL => Ok(Self::Bell),
            server::MSG_SERVER_CUT_TEXT => Ok(Self::ServerCutText),
            other => Err(other),
        }
    }
}

/// Read the raw message-type byte.
///
/// Classification is left to the caller via [`ServerMessageType::try_from`] so
/// that an unknown type can be reported with its value.
pub async fn read_message_type<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
) -> std::io::Result<u8> {
    stream.read_u8().await
}
