//! Async RFB (VNC) update pipeline.
//!
//! This crate turns the server-to-client half of an established RFB session
//! into a decoded framebuffer. It is built on top of the low-level
//! `rfb-protocol` and `rfb-encodings` crates: the transport and handshake are
//! somebody else's job, and [`ClientBuilder::attach`] takes over the streams
//! right after ServerInit.
//!
//! # Features
//!
//! - **Async I/O**: Built on tokio; one task owns the connection
//! - **All standard encodings**: Raw, CopyRect, RRE, CoRRE, Hextile, Zlib, Tight, ZRLE
//! - **Cursor pseudo-encodings**: XCursor, RichCursor, PointerPos, drawn locally
//! - **Configuration management**: TOML files and a validating builder
//! - **Fail-fast policy**: Clear error messages, no defensive fallbacks
//!
//! # Quick Start
//!
//! ```no_run
//! use rfb_client::{Config, ClientBuilder, ServerEvent};
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let stream = tokio::net::TcpStream::connect("localhost:5900").await?;
//!     // ... handshake and ServerInit happen here ...
//!     let (reader, writer) = stream.into_split();
//!
//!     let config = Config::builder().pixel_depth(32).build()?;
//!     let client = ClientBuilder::new(config).attach(reader, writer, 1024, 768, "desktop")?;
//!     let handle = client.handle();
//!
//!     while let Ok(event) = handle.events().recv_async().await {
//!         match event {
//!             ServerEvent::FramebufferUpdated { damage, .. } => {
//!                 let fb = handle.framebuffer();
//!                 let fb = fb.lock();
//!                 println!("{} rects changed in {}x{}", damage.len(), fb.width(), fb.height());
//!             }
//!             ServerEvent::ConnectionClosed => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Pump task**: reads server messages, decodes updates into a private
//!   working buffer, publishes finished updates, schedules the next request
//! - **Handle**: commands in and events out over bounded `flume` channels,
//!   plus read access to the published framebuffer, cursor and statistics
//!
//! # Error Handling
//!
//! Every decode error is fatal. Persistent inflate streams and tile state
//! cannot be resynchronized once a payload is misread, so the session ends
//! with an [`ServerEvent::Error`] followed by [`ServerEvent::ConnectionClosed`].
//!
//! # Safety
//!
//! This crate is `#![forbid(unsafe_code)]` and uses only safe Rust.

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod messages;
pub mod protocol_trace;
pub mod stats;

mod event_loop;
mod framebuffer;
mod protocol;
mod scheduler;

// Optional CLI support
#[cfg(feature = "cli")]
pub mod args;

pub use config::{Config, ConfigBuilder};
pub use errors::RfbClientError;
pub use messages::{ClientCommand, ServerEvent};
pub use stats::DecodeStats;

use event_loop::{Session, Shared};
use framebuffer::Framebuffer;
use parking_lot::Mutex;
use rfb_encodings::{CancelSignal, CursorOverlay, RfbInStream};
use rfb_pixelbuffer::FramebufferStore;
use rfb_protocol::io::RfbOutStream;
use scheduler::UpdateScheduler;
use stats::StatsWindow;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Thread-safe handle to the published framebuffer.
///
/// The pump replaces or patches it only between whole updates, so a reader
/// holding the lock never sees a half-applied update.
pub type FramebufferHandle = Arc<Mutex<FramebufferStore>>;

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

/// Builder for attaching the update pipeline to a session.
///
/// # Examples
///
/// ```no_run
/// use rfb_client::{Config, ClientBuilder};
/// # use anyhow::Result;
///
/// # async fn example() -> Result<()> {
/// let (client_io, _server_io) = tokio::io::duplex(64 * 1024);
/// let (reader, writer) = tokio::io::split(client_io);
/// let client = ClientBuilder::new(Config::default()).attach(reader, writer, 640, 480, "test")?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: Config,
}

impl ClientBuilder {
    /// Creates a new client builder with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Spawns the pump on the current tokio runtime.
    ///
    /// `reader`/`writer` must be positioned right after ServerInit; `width`,
    /// `height` and `name` come from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn attach<R, W>(
        self,
        reader: R,
        writer: W,
        width: u16,
        height: u16,
        name: impl Into<String>,
    ) -> Result<Client, RfbClientError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.config.validate()?;
        let format = self.config.pixel_format()?;

        let (cancel_tx, cancel) = CancelSignal::pair();
        let (cmd_tx, cmd_rx) = flume::bounded(COMMAND_CAPACITY);
        let (event_tx, event_rx) = flume::bounded(EVENT_CAPACITY);

        let framebuffer = Framebuffer::new(
            width,
            height,
            format,
            self.config.decoder_settings(),
            cancel.clone(),
        );
        let shared = Shared::new(framebuffer.store().clone());
        let session = Session {
            scheduler: UpdateScheduler::new(width, height, self.config.defer()),
            window: StatsWindow::new(
                self.config.stats.exclude_updates,
                self.config.stats.measure_updates,
            ),
            name: name.into(),
            input: RfbInStream::new(reader),
            output: RfbOutStream::new(writer),
            framebuffer,
            shared: shared.clone(),
            commands: cmd_rx,
            events: event_tx,
            config: self.config,
        };

        let join_handle = tokio::spawn(event_loop::run(session, cancel));

        Ok(Client {
            handle: ClientHandle {
                commands: cmd_tx,
                events: event_rx,
                shared,
                cancel: Arc::new(cancel_tx),
            },
            join_handle: Some(join_handle),
        })
    }
}

/// Handle for interacting with a running pipeline.
///
/// It can be cloned and shared across threads.
#[derive(Clone)]
pub struct ClientHandle {
    commands: flume::Sender<ClientCommand>,
    events: flume::Receiver<ServerEvent>,
    shared: Shared,
    cancel: Arc<watch::Sender<bool>>,
}

impl ClientHandle {
    /// Queues a command for the pump.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline has stopped.
    pub fn send(&self, cmd: ClientCommand) -> Result<(), RfbClientError> {
        self.commands
            .send(cmd)
            .map_err(|_| RfbClientError::ConnectionClosed)
    }

    /// Returns a reference to the event receiver.
    #[must_use]
    pub fn events(&self) -> &flume::Receiver<ServerEvent> {
        &self.events
    }

    /// The published framebuffer.
    #[must_use]
    pub fn framebuffer(&self) -> FramebufferHandle {
        Arc::clone(&self.shared.framebuffer)
    }

    /// Cursor shape and position as of the last update.
    #[must_use]
    pub fn cursor(&self) -> CursorOverlay {
        self.shared.cursor.lock().clone()
    }

    /// Decode statistics as of the last update.
    #[must_use]
    pub fn stats(&self) -> DecodeStats {
        *self.shared.stats.lock()
    }

    /// Stops the pump, interrupting any message in progress including a
    /// pending JPEG decode.
    pub fn close(&self) {
        let _ = self.cancel.send(true);
    }
}

/// A running update pipeline.
///
/// Dropping the client cancels the pump.
pub struct Client {
    handle: ClientHandle,
    join_handle: Option<JoinHandle<Result<(), RfbClientError>>>,
}

impl Client {
    /// Returns a handle for interacting with the pipeline.
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Waits for the pump to finish and returns the error that ended it, if any.
    ///
    /// # Errors
    ///
    /// Returns the fatal session error, or `Internal` if the task panicked.
    pub async fn join(mut self) -> Result<(), RfbClientError> {
        // Taking the handle keeps Drop from cancelling the pump.
        let Some(join_handle) = self.join_handle.take() else {
            return Ok(());
        };
        join_handle
            .await
            .map_err(|e| RfbClientError::Internal(format!("Client task panicked: {e}")))?
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            self.handle.close();
        }
    }
}
