//! Framebuffer state management and rectangle dispatch.
//!
//! [`Framebuffer`] owns the working pixel store and the per-connection
//! [`DecoderState`]. It reads one FramebufferUpdate at a time, routing each
//! rectangle by its encoding id, and reports the coalesced damage once the
//! whole update has been applied. Nothing here is shared: publishing to the
//! presentation side happens in the event loop at update boundaries.

use crate::errors::RfbClientError;
use crate::messages::ServerEvent;
use crate::stats::DecodeStats;
use rfb_common::{DamageTracker, Point, Rect};
use rfb_encodings::{
    cursor, dest_rect, CancelSignal, CursorOverlay, CursorUpdate, DecoderSettings, DecoderState,
    Encoding, PixelFormat, RectKind, RfbInStream,
};
use rfb_pixelbuffer::FramebufferStore;
use rfb_protocol::messages::types::Rectangle;
use tokio::io::AsyncRead;

/// Rectangle count meaning "until LastRect".
const RECT_COUNT_UNBOUNDED: u16 = 0xFFFF;

/// What one FramebufferUpdate changed besides pixels.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Coalesced dirty rectangles in framebuffer coordinates.
    pub damage: Vec<Rect>,
    /// New geometry if a NewFBSize rectangle was applied.
    pub resized: Option<(u16, u16)>,
    /// Cursor and resize notifications, in stream order.
    pub events: Vec<ServerEvent>,
}

/// Framebuffer state and decoder dispatcher.
pub struct Framebuffer {
    store: FramebufferStore,
    state: DecoderState,
    damage: DamageTracker,
    cursor: CursorOverlay,
    stats: DecodeStats,
}

impl Framebuffer {
    pub fn new(
        width: u16,
        height: u16,
        format: PixelFormat,
        settings: DecoderSettings,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            store: FramebufferStore::new(u32::from(width), u32::from(height), format),
            state: DecoderState::new(settings, cancel),
            damage: DamageTracker::new(),
            cursor: CursorOverlay::default(),
            stats: DecodeStats::default(),
        }
    }

    pub fn size(&self) -> (u16, u16) {
        (self.store.width() as u16, self.store.height() as u16)
    }

    pub fn store(&self) -> &FramebufferStore {
        &self.store
    }

    pub fn format(&self) -> &PixelFormat {
        self.store.format()
    }

    pub fn cursor(&self) -> &CursorOverlay {
        &self.cursor
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut DecodeStats {
        &mut self.stats
    }

    /// Switch the working store to `format`. Contents are cleared.
    pub fn set_pixel_format(&mut self, format: PixelFormat) {
        tracing::info!(
            "Switching pixel format to {}bpp (depth {})",
            format.bits_per_pixel,
            format.depth
        );
        self.store.set_format(format);
        self.damage.clear();
    }

    /// Read a FramebufferUpdate body (after the type byte) and apply every
    /// rectangle in it.
    pub async fn apply_update<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
    ) -> Result<UpdateOutcome, RfbClientError> {
        let header = crate::protocol::read_update_header(stream).await?;
        let mut outcome = UpdateOutcome::default();
        self.damage.clear();

        let unbounded = header.rect_count == RECT_COUNT_UNBOUNDED;
        let mut remaining = header.rect_count;
        while unbounded || remaining > 0 {
            remaining = remaining.saturating_sub(1);
            let rect = Rectangle::read_from(stream).await?;
            self.stats.record_rect();
            tracing::debug!(
                "FramebufferUpdate rect: x={}, y={}, w={}, h={}, encoding={}",
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                rect.encoding
            );

            let kind = RectKind::classify(rect.encoding)
                .ok_or(RfbClientError::UnsupportedEncoding(rect.encoding))?;
            match kind {
                RectKind::LastRect => break,
                RectKind::NewFbSize => {
                    self.resize(rect.width, rect.height);
                    outcome.resized = Some((rect.width, rect.height));
                    outcome.events.push(ServerEvent::DesktopResized {
                        width: rect.width,
                        height: rect.height,
                    });
                }
                RectKind::PointerPos => {
                    self.cursor
                        .move_to(Point::new(i32::from(rect.x), i32::from(rect.y)));
                    outcome.events.push(ServerEvent::CursorMoved {
                        x: rect.x,
                        y: rect.y,
                    });
                }
                RectKind::Cursor(kind) => {
                    let update = cursor::decode(
                        stream,
                        &rect,
                        kind,
                        self.store.format(),
                        &self.state.settings,
                    )
                    .await
                    .map_err(RfbClientError::from_decode)?;
                    if self.state.settings.ignore_cursor_updates {
                        continue;
                    }
                    let shape = match &update {
                        CursorUpdate::Shape(shape) => Some(shape.clone()),
                        CursorUpdate::Hidden => None,
                    };
                    self.cursor.apply(update);
                    outcome.events.push(ServerEvent::CursorShapeChanged { shape });
                }
                RectKind::Pixels(encoding) => self.apply_pixels(stream, &rect, encoding).await?,
            }
        }

        outcome.damage = self.damage.take();
        Ok(outcome)
    }

    async fn apply_pixels<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        encoding: Encoding,
    ) -> Result<(), RfbClientError> {
        let right = u32::from(rect.x) + u32::from(rect.width);
        let bottom = u32::from(rect.y) + u32::from(rect.height);
        if right > self.store.width() || bottom > self.store.height() {
            return Err(RfbClientError::ProtocolViolation(format!(
                "{} rectangle ({},{} {}x{}) exceeds framebuffer {}x{}",
                encoding.name(),
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                self.store.width(),
                self.store.height()
            )));
        }

        let before = stream.bytes_read();
        let decoded = encoding
            .decode(stream, rect, &mut self.state, &mut self.store)
            .await
            .map_err(RfbClientError::from_decode)?;

        let pixel_bytes = u64::from(rect.width)
            * u64::from(rect.height)
            * u64::from(self.store.format().bytes_per_pixel());
        self.stats
            .record_pixels(encoding, decoded, pixel_bytes, stream.bytes_read() - before);
        self.damage.add(dest_rect(rect));
        Ok(())
    }

    fn resize(&mut self, width: u16, height: u16) {
        tracing::info!("Desktop resized to {}x{}", width, height);
        self.store.resize(u32::from(width), u32::from(height));
        self.damage.clear();
    }
}
