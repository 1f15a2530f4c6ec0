//! Server-to-client RFB messages.
//!
//! The message-type byte is read separately by [`super::read_message_type`];
//! the types here parse what follows it. A FramebufferUpdate is deliberately
//! parsed header-only: its rectangles are interleaved with encoded payloads
//! whose length depends on decoder state, so they are read one at a time by
//! the decode loop.

use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

pub const MSG_FRAMEBUFFER_UPDATE: u8 = 0;
pub const MSG_SET_COLOUR_MAP_ENTRIES: u8 = 1;
pub const MSG_BELL: u8 = 2;
pub const MSG_SERVER_CUT_TEXT: u8 = 3;

/// Body of a FramebufferUpdate up to, but not including, the first rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateHeader {
    pub rect_count: u16,
}

impl FramebufferUpdateHeader {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(1).await?; // padding
        let rect_count = stream.read_u16().await?;
        Ok(Self { rect_count })
    }

    /// Writes the message type byte too.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_FRAMEBUFFER_UPDATE);
        stream.write_u8(0);
        stream.write_u16(self.rect_count);
    }
}

/// Clipboard text from the server. RFB mandates Latin-1; invalid bytes are
/// replaced rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCutText {
    pub text: String,
}

impl ServerCutText {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(3).await?; // padding
        let length = stream.read_u32().await? as usize;
        let bytes = stream.read_vec(length).await?;
        let text = bytes.iter().map(|&b| char::from(b)).collect();
        Ok(Self { text })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        let latin1: Vec<u8> = self
            .text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        stream.write_u8(MSG_SERVER_CUT_TEXT);
        stream.write_bytes(&[0, 0, 0]);
        stream.write_u32(latin1.len() as u32);
        stream.write_bytes(&latin1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_update_header_does_not_read_rectangles() {
        // padding, count=2, then the first byte of a rectangle
        let mut input = RfbInStream::new(Cursor::new(vec![0, 0, 2, 0xAA]));
        let header = FramebufferUpdateHeader::read_from(&mut input).await.unwrap();
        assert_eq!(header.rect_count, 2);
        assert_eq!(input.read_u8().await.unwrap(), 0xAA);
    }

    #[tokio::test]
    async fn test_server_cut_text_latin1() {
        let mut out = RfbOutStream::new(Vec::new());
        ServerCutText {
            text: "caf\u{e9}".to_string(),
        }
        .write_to(&mut out);
        out.flush().await.unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes, vec![3, 0, 0, 0, 0, 0, 0, 4, b'c', b'a', b'f', 0xE9]);

        let mut input = RfbInStream::new(Cursor::new(bytes));
        assert_eq!(input.read_u8().await.unwrap(), MSG_SERVER_CUT_TEXT);
        let msg = ServerCutText::read_from(&mut input).await.unwrap();
        assert_eq!(msg.text, "caf\u{e9}");
    }
}
