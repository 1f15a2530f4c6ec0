//! Protocol message helpers for sending/receiving RFB messages.
//!
//! Thin wrappers over `rfb_protocol::messages` that trace each message when
//! `RUST_VNC_TRACE` is on and map failures onto [`RfbClientError`].

use crate::errors::RfbClientError;
use crate::protocol_trace;
use rfb_encodings::PixelFormat;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages as msg;
use rfb_protocol::messages::ServerMessageType;
use tokio::io::{AsyncRead, AsyncWrite};

/// Classify a message type byte already read from the stream.
pub fn classify_message_type(t: u8) -> Result<ServerMessageType, RfbClientError> {
    if protocol_trace::enabled() {
        protocol_trace::in_msg("ServerMessageType", &format!("type={}", t));
    }
    ServerMessageType::try_from(t).map_err(RfbClientError::UnsupportedMessage)
}

/// Read a FramebufferUpdate header (padding and rectangle count).
pub async fn read_update_header<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> Result<msg::FramebufferUpdateHeader, RfbClientError> {
    let header = msg::FramebufferUpdateHeader::read_from(instream).await?;
    if protocol_trace::enabled() {
        protocol_trace::in_msg("FramebufferUpdate", &format!("rects={}", header.rect_count));
    }
    Ok(header)
}

/// Read a ServerCutText body.
pub async fn read_server_cut_text<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> Result<msg::ServerCutText, RfbClientError> {
    let cut = msg::ServerCutText::read_from(instream).await?;
    if protocol_trace::enabled() {
        protocol_trace::in_msg("ServerCutText", &format!("len={}", cut.text.len()));
    }
    Ok(cut)
}

/// Write SetPixelFormat and flush.
pub async fn write_set_pixel_format<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    pixel_format: PixelFormat,
) -> Result<(), RfbClientError> {
    let msg = msg::SetPixelFormat {
        pixel_format: pixel_format.into(),
    };
    if protocol_trace::enabled() {
        protocol_trace::out_msg(
            "SetPixelFormat",
            &format!(
                "bpp={} depth={} shifts={}/{}/{}",
                msg.pixel_format.bits_per_pixel,
                msg.pixel_format.depth,
                msg.pixel_format.red_shift,
                msg.pixel_format.green_shift,
                msg.pixel_format.blue_shift
            ),
        );
    }
    msg.write_to(outstream)
        .map_err(|e| RfbClientError::ProtocolViolation(format!("failed to write SetPixelFormat: {}", e)))?;
    tracing::debug!(
        "Wrote SetPixelFormat (bpp={}, depth={})",
        msg.pixel_format.bits_per_pixel,
        msg.pixel_format.depth
    );
    outstream.flush().await.map_err(RfbClientError::Transport)
}

/// Write SetEncodings with preferred encoding order and flush.
pub async fn write_set_encodings<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    encodings: Vec<i32>,
) -> Result<(), RfbClientError> {
    let msg = msg::SetEncodings { encodings };
    if protocol_trace::enabled() {
        protocol_trace::out_msg("SetEncodings", &format!("n={}", msg.encodings.len()));
    }
    tracing::debug!("Wrote SetEncodings: {:?}", msg.encodings);
    msg.write_to(outstream);
    outstream.flush().await.map_err(RfbClientError::Transport)
}

/// Write a FramebufferUpdateRequest and flush.
pub async fn write_framebuffer_update_request<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    request: msg::FramebufferUpdateRequest,
) -> Result<(), RfbClientError> {
    if protocol_trace::enabled() {
        protocol_trace::out_msg(
            "FramebufferUpdateRequest",
            &format!(
                "inc={} rect=({},{} {}x{})",
                request.incremental, request.x, request.y, request.width, request.height
            ),
        );
    }
    tracing::debug!(
        "Wrote FramebufferUpdateRequest inc={} rect=({},{} {}x{})",
        request.incremental,
        request.x,
        request.y,
        request.width,
        request.height
    );
    request.write_to(outstream);
    outstream.flush().await.map_err(RfbClientError::Transport)
}
