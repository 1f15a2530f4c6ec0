//! Application-facing message types for communication between the client and application.

use rfb_common::Rect;
use rfb_encodings::{CursorShape, PixelFormat};

/// Events sent from the update pipeline to the application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The pipeline is attached and the initial requests have been sent.
    Connected {
        /// Framebuffer width in pixels.
        width: u16,
        /// Framebuffer height in pixels.
        height: u16,
        /// Server name/description.
        name: String,
        /// Pixel format sent in SetPixelFormat.
        pixel_format: PixelFormat,
    },

    /// A whole FramebufferUpdate has been applied and published.
    ///
    /// `damage` is in framebuffer coordinates; `repaint` is the same region
    /// mapped onto the display at the configured scaling factor.
    FramebufferUpdated {
        /// Coalesced dirty rectangles.
        damage: Vec<Rect>,
        /// Dirty rectangles in display coordinates.
        repaint: Vec<Rect>,
    },

    /// Desktop size changed (NewFBSize). The framebuffer contents are cleared.
    DesktopResized {
        /// New width in pixels.
        width: u16,
        /// New height in pixels.
        height: u16,
    },

    /// Server-side pointer position changed.
    CursorMoved {
        /// X coordinate in framebuffer pixels.
        x: u16,
        /// Y coordinate in framebuffer pixels.
        y: u16,
    },

    /// Cursor shape replaced. `None` hides the cursor.
    CursorShapeChanged {
        /// New shape, already scaled.
        shape: Option<CursorShape>,
    },

    /// Server sent a bell notification.
    Bell,

    /// Server sent clipboard/cut text data.
    ServerCutText {
        /// Clipboard text, decoded from Latin-1.
        text: String,
    },

    /// A fatal error ended the session. Always followed by `ConnectionClosed`.
    Error {
        /// The error message.
        message: String,
    },

    /// The pipeline has stopped.
    ConnectionClosed,
}

/// Commands sent from the application to the update pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Request a framebuffer update.
    RequestUpdate {
        /// If true, only send updates for changed regions.
        incremental: bool,
        /// Rectangle to update. If None, update the entire screen.
        rect: Option<Rect>,
    },

    /// Switch between 8-bit palette and 32-bit true colour at the next
    /// update boundary.
    SetPixelDepth(u8),

    /// Close the connection.
    Close,
}
