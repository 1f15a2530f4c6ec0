//! Decoders for RFB (VNC) rectangle encodings.
//!
//! Each encoding module exposes one `decode` function that consumes exactly
//! that encoding's byte layout from an [`RfbInStream`] and writes pixels into
//! a [`MutablePixelBuffer`]. The set of encodings is fixed by the protocol,
//! so dispatch is a closed [`Encoding`] enum rather than a trait object.
//!
//! # Key Concepts
//!
//! - **Streaming**: decoders read straight from the connection; a rectangle's
//!   length is only known once its payload has been parsed.
//! - **Persistent state**: zlib streams outlive rectangles and live in
//!   [`DecoderState`], owned by one connection.
//! - **Fail fast**: any inconsistency is an error. There is no way to skip an
//!   unparseable payload, so decoders never guess.
//!
//! # Encoding ids
//!
//! - [`ENCODING_RAW`] (0), [`ENCODING_COPYRECT`] (1), [`ENCODING_RRE`] (2),
//!   [`ENCODING_CORRE`] (4), [`ENCODING_HEXTILE`] (5), [`ENCODING_ZLIB`] (6),
//!   [`ENCODING_TIGHT`] (7), [`ENCODING_ZRLE`] (16)
//! - Pseudo-encodings: [`PSEUDO_ENCODING_LAST_RECT`], [`PSEUDO_ENCODING_NEW_FB_SIZE`],
//!   [`PSEUDO_ENCODING_POINTER_POS`], [`PSEUDO_ENCODING_XCURSOR`],
//!   [`PSEUDO_ENCODING_RICH_CURSOR`]

use anyhow::{Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

pub use rfb_pixelbuffer::{MutablePixelBuffer, PixelBuffer, PixelFormat};
pub use rfb_protocol::io::RfbInStream;
pub use rfb_protocol::messages::types::{
    Rectangle, ENCODING_COPYRECT, ENCODING_CORRE, ENCODING_HEXTILE, ENCODING_RAW, ENCODING_RRE,
    ENCODING_TIGHT, ENCODING_ZLIB, ENCODING_ZRLE, PSEUDO_ENCODING_LAST_RECT,
    PSEUDO_ENCODING_NEW_FB_SIZE, PSEUDO_ENCODING_POINTER_POS, PSEUDO_ENCODING_RICH_CURSOR,
    PSEUDO_ENCODING_XCURSOR,
};

pub mod bit_cursor;
pub mod copyrect;
pub mod cursor;
pub mod error;
pub mod hextile;
pub mod jpeg;
pub mod raw;
pub mod rre;
pub mod state;
pub mod tight;
pub mod zlib;
pub mod zlib_pool;
pub mod zrle;

pub use bit_cursor::BitCursor;
pub use cursor::{CursorOverlay, CursorShape, CursorUpdate};
pub use error::DecodeError;
pub use state::{CancelSignal, DecoderSettings, DecoderState};
pub use zlib_pool::{OutputSize, StreamId, ZlibStreamPool};

/// Pixel-carrying encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Raw,
    CopyRect,
    Rre,
    CoRre,
    Hextile,
    Zlib,
    Tight,
    Zrle,
}

impl Encoding {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            ENCODING_RAW => Some(Encoding::Raw),
            ENCODING_COPYRECT => Some(Encoding::CopyRect),
            ENCODING_RRE => Some(Encoding::Rre),
            ENCODING_CORRE => Some(Encoding::CoRre),
            ENCODING_HEXTILE => Some(Encoding::Hextile),
            ENCODING_ZLIB => Some(Encoding::Zlib),
            ENCODING_TIGHT => Some(Encoding::Tight),
            ENCODING_ZRLE => Some(Encoding::Zrle),
            _ => None,
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Encoding::Raw => ENCODING_RAW,
            Encoding::CopyRect => ENCODING_COPYRECT,
            Encoding::Rre => ENCODING_RRE,
            Encoding::CoRre => ENCODING_CORRE,
            Encoding::Hextile => ENCODING_HEXTILE,
            Encoding::Zlib => ENCODING_ZLIB,
            Encoding::Tight => ENCODING_TIGHT,
            Encoding::Zrle => ENCODING_ZRLE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Raw => "Raw",
            Encoding::CopyRect => "CopyRect",
            Encoding::Rre => "RRE",
            Encoding::CoRre => "CoRRE",
            Encoding::Hextile => "Hextile",
            Encoding::Zlib => "Zlib",
            Encoding::Tight => "Tight",
            Encoding::Zrle => "ZRLE",
        }
    }

    /// Decode one rectangle's payload into `buffer`.
    pub async fn decode<R: AsyncRead + Unpin>(
        self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        state: &mut DecoderState,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<Decoded> {
        let before = stream.bytes_read();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "{} decode start: rect=[{},{} {}x{}]",
            self.name(), rect.x, rect.y, rect.width, rect.height
        );

        let decoded = match self {
            Encoding::Raw => raw::decode(stream, rect, buffer).await.map(|_| Decoded::Plain),
            Encoding::CopyRect => copyrect::decode(stream, rect, buffer)
                .await
                .map(|_| Decoded::Plain),
            Encoding::Rre => rre::decode(stream, rect, rre::Variant::Rre, buffer)
                .await
                .map(|_| Decoded::Plain),
            Encoding::CoRre => rre::decode(stream, rect, rre::Variant::CoRre, buffer)
                .await
                .map(|_| Decoded::Plain),
            Encoding::Hextile => hextile::decode(stream, rect, buffer)
                .await
                .map(|_| Decoded::Plain),
            Encoding::Zlib => zlib::decode(stream, rect, state, buffer)
                .await
                .map(|_| Decoded::Plain),
            Encoding::Zrle => zrle::decode(stream, rect, state, buffer)
                .await
                .map(|_| Decoded::Plain),
            Encoding::Tight => tight::decode(stream, rect, state, buffer).await,
        }
        .with_context(|| {
            format!(
                "{} rectangle at ({}, {}) size {}x{}",
                self.name(),
                rect.x,
                rect.y,
                rect.width,
                rect.height
            )
        })?;

        tracing::debug!(
            target: "rfb_encodings::framing",
            "{} decode end: bytes_consumed={}",
            self.name(),
            stream.bytes_read() - before
        );
        Ok(decoded)
    }
}

/// How a pixel rectangle was actually decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Plain,
    /// Tight rectangle carrying a JPEG image.
    TightJpeg,
}

/// Cursor shape pseudo-encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorEncoding {
    XCursor,
    RichCursor,
}

/// Classification of a rectangle header's encoding id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectKind {
    Pixels(Encoding),
    LastRect,
    NewFbSize,
    PointerPos,
    Cursor(CursorEncoding),
}

impl RectKind {
    /// `None` for ids this pipeline cannot parse.
    pub fn classify(id: i32) -> Option<Self> {
        if let Some(enc) = Encoding::from_id(id) {
            return Some(RectKind::Pixels(enc));
        }
        match id {
            PSEUDO_ENCODING_LAST_RECT => Some(RectKind::LastRect),
            PSEUDO_ENCODING_NEW_FB_SIZE => Some(RectKind::NewFbSize),
            PSEUDO_ENCODING_POINTER_POS => Some(RectKind::PointerPos),
            PSEUDO_ENCODING_XCURSOR => Some(RectKind::Cursor(CursorEncoding::XCursor)),
            PSEUDO_ENCODING_RICH_CURSOR => Some(RectKind::Cursor(CursorEncoding::RichCursor)),
            _ => None,
        }
    }
}

/// Framebuffer rectangle covered by a header.
pub fn dest_rect(rect: &Rectangle) -> Rect {
    Rect::new(
        i32::from(rect.x),
        i32::from(rect.y),
        u32::from(rect.width),
        u32::from(rect.height),
    )
}

/// Read one pixel in the buffer's native byte layout.
pub(crate) async fn read_pixel<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    bytes_per_pixel: usize,
) -> std::io::Result<Vec<u8>> {
    stream.read_vec(bytes_per_pixel).await
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_ids_round_trip() {
        for enc in [
            Encoding::Raw,
            Encoding::CopyRect,
            Encoding::Rre,
            Encoding::CoRre,
            Encoding::Hextile,
            Encoding::Zlib,
            Encoding::Tight,
            Encoding::Zrle,
        ] {
            assert_eq!(Encoding::from_id(enc.id()), Some(enc));
        }
        assert_eq!(Encoding::from_id(3), None);
    }

    #[test]
    fn test_classify_pseudo_encodings() {
        assert_eq!(RectKind::classify(-224), Some(RectKind::LastRect));
        assert_eq!(RectKind::classify(-223), Some(RectKind::NewFbSize));
        assert_eq!(RectKind::classify(-232), Some(RectKind::PointerPos));
        assert_eq!(
            RectKind::classify(-240),
            Some(RectKind::Cursor(CursorEncoding::XCursor))
        );
        assert_eq!(
            RectKind::classify(-239),
            Some(RectKind::Cursor(CursorEncoding::RichCursor))
        );
        assert_eq!(RectKind::classify(16), Some(RectKind::Pixels(Encoding::Zrle)));
        assert_eq!(RectKind::classify(15), None);
        assert_eq!(RectKind::classify(-250), None);
    }
}
