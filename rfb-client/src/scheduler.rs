//! Update request scheduling.
//!
//! After each FramebufferUpdate the pipeline asks for the next one. The
//! request is incremental unless something invalidated the client's copy
//! (attach, resize, pixel format switch), in which case the whole
//! framebuffer is requested. A pixel format switch is held here until the
//! next update boundary so that no rectangle is ever decoded with a format
//! the server was not told about.

use rfb_common::Rect;
use rfb_encodings::PixelFormat;
use rfb_protocol::messages::FramebufferUpdateRequest;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UpdateScheduler {
    width: u16,
    height: u16,
    full_pending: bool,
    pending_format: Option<PixelFormat>,
    defer: Duration,
}

impl UpdateScheduler {
    /// The first request after attach is always a full one.
    pub fn new(width: u16, height: u16, defer: Duration) -> Self {
        Self {
            width,
            height,
            full_pending: true,
            pending_format: None,
            defer,
        }
    }

    pub fn defer(&self) -> Duration {
        self.defer
    }

    /// Framebuffer geometry changed; the next request covers the new size.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.full_pending = true;
    }

    /// Queue a pixel format switch for the next update boundary.
    pub fn set_pending_format(&mut self, format: PixelFormat) {
        self.pending_format = Some(format);
    }

    /// Take the queued format switch, if any. The next request becomes full.
    pub fn take_pending_format(&mut self) -> Option<PixelFormat> {
        let format = self.pending_format.take()?;
        self.full_pending = true;
        Some(format)
    }

    pub fn is_full_pending(&self) -> bool {
        self.full_pending
    }

    /// The request to send after the current update boundary.
    pub fn next_request(&mut self) -> FramebufferUpdateRequest {
        let incremental = !std::mem::replace(&mut self.full_pending, false);
        FramebufferUpdateRequest {
            incremental,
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }

    /// An application-issued request, clipped to the framebuffer.
    ///
    /// Returns `None` when the clipped area is empty.
    pub fn explicit_request(
        &self,
        incremental: bool,
        rect: Option<Rect>,
    ) -> Option<FramebufferUpdateRequest> {
        let bounds = Rect::new(0, 0, u32::from(self.width), u32::from(self.height));
        let rect = match rect {
            None => bounds,
            Some(r) => {
                let x = r.x.clamp(0, bounds.right());
                let y = r.y.clamp(0, bounds.bottom());
                let right = r.right().clamp(x, bounds.right());
                let bottom = r.bottom().clamp(y, bounds.bottom());
                Rect::new(x, y, (right - x) as u32, (bottom - y) as u32)
            }
        };
        if rect.is_empty() {
            return None;
        }
        Some(FramebufferUpdateRequest {
            incremental,
            x: rect.x as u16,
            y: rect.y as u16,
            width: rect.width as u16,
            height: rect.height as u16,
        })
    }
}
