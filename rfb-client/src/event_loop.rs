//! Event loop: message pump, update publishing and request scheduling.
//!
//! One task owns the connection. Between messages it waits for the next
//! message type byte, a command from the application, or cancellation. Once a
//! message has started it is only raced against cancellation, so a command
//! can never interleave with a half-read message. The decoded framebuffer is
//! published to the shared store only after a whole update has been applied.

use crate::{
    config::Config,
    errors::RfbClientError,
    framebuffer::{Framebuffer, UpdateOutcome},
    messages::{ClientCommand, ServerEvent},
    protocol,
    scheduler::UpdateScheduler,
    stats::{DecodeStats, StatsWindow},
};
use parking_lot::Mutex;
use rfb_common::Rect;
use rfb_encodings::{CancelSignal, CursorOverlay, PixelFormat, RfbInStream};
use rfb_pixelbuffer::FramebufferStore;
use rfb_protocol::io::RfbOutStream;
use rfb_protocol::messages::ServerMessageType;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;

/// State visible to the application while the loop runs.
#[derive(Clone)]
pub(crate) struct Shared {
    pub framebuffer: Arc<Mutex<FramebufferStore>>,
    pub cursor: Arc<Mutex<CursorOverlay>>,
    pub stats: Arc<Mutex<DecodeStats>>,
}

impl Shared {
    pub fn new(store: FramebufferStore) -> Self {
        Self {
            framebuffer: Arc::new(Mutex::new(store)),
            cursor: Arc::new(Mutex::new(CursorOverlay::default())),
            stats: Arc::new(Mutex::new(DecodeStats::default())),
        }
    }
}

pub(crate) struct Session<R, W> {
    pub config: Config,
    pub name: String,
    pub input: RfbInStream<R>,
    pub output: RfbOutStream<W>,
    pub framebuffer: Framebuffer,
    pub scheduler: UpdateScheduler,
    pub window: StatsWindow,
    pub shared: Shared,
    pub commands: flume::Receiver<ClientCommand>,
    pub events: flume::Sender<ServerEvent>,
}

/// Run the pump to completion.
///
/// Always emits `ConnectionClosed` last; a fatal error is reported as an
/// `Error` event first and returned.
pub(crate) async fn run<R, W>(
    mut session: Session<R, W>,
    mut cancel: CancelSignal,
) -> Result<(), RfbClientError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let result = select! {
        biased;
        _ = cancel.cancelled() => Ok(()),
        res = session.pump() => res,
    };

    let result = match result {
        Ok(()) | Err(RfbClientError::Cancelled) => {
            tracing::info!("Connection closed");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Connection failed: {}", e);
            emit(
                &session.events,
                ServerEvent::Error {
                    message: e.to_string(),
                },
            )
            .await;
            Err(e)
        }
    };
    emit(&session.events, ServerEvent::ConnectionClosed).await;
    result
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// `Ok` means an orderly close by either side.
    async fn pump(&mut self) -> Result<(), RfbClientError> {
        self.start().await?;

        loop {
            // Commands first: one queued before a message must not lose to it.
            let msg_type = select! {
                biased;
                cmd = self.commands.recv_async() => {
                    match cmd {
                        Ok(ClientCommand::Close) | Err(_) => return Ok(()),
                        Ok(command) => {
                            self.handle_command(command).await?;
                            continue;
                        }
                    }
                }
                res = self.input.read_u8() => match res {
                    Ok(t) => t,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        tracing::info!("Server closed the connection");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            self.handle_message(msg_type).await?;
        }
    }

    /// SetPixelFormat, SetEncodings and the first full request.
    async fn start(&mut self) -> Result<(), RfbClientError> {
        let format = *self.framebuffer.format();
        protocol::write_set_pixel_format(&mut self.output, format).await?;
        protocol::write_set_encodings(&mut self.output, self.config.effective_encodings()).await?;
        let request = self.scheduler.next_request();
        protocol::write_framebuffer_update_request(&mut self.output, request).await?;

        let (width, height) = self.framebuffer.size();
        tracing::info!(
            "Attached to '{}' ({}x{}, {}bpp)",
            self.name,
            width,
            height,
            format.bits_per_pixel
        );
        emit(&self.events, ServerEvent::Connected {
            width,
            height,
            name: self.name.clone(),
            pixel_format: format,
        })
        .await;
        Ok(())
    }

    async fn handle_message(&mut self, msg_type: u8) -> Result<(), RfbClientError> {
        match protocol::classify_message_type(msg_type)? {
            ServerMessageType::FramebufferUpdate => {
                let outcome = self.framebuffer.apply_update(&mut self.input).await?;
                self.finish_update(outcome).await
            }
            ServerMessageType::SetColourMapEntries => {
                Err(RfbClientError::UnsupportedMessage(msg_type))
            }
            ServerMessageType::Bell => {
                emit(&self.events, ServerEvent::Bell).await;
                Ok(())
            }
            ServerMessageType::ServerCutText => {
                let cut = protocol::read_server_cut_text(&mut self.input).await?;
                emit(&self.events, ServerEvent::ServerCutText { text: cut.text }).await;
                Ok(())
            }
        }
    }

    /// Update boundary: publish, notify, switch format, request the next one.
    async fn finish_update(&mut self, outcome: UpdateOutcome) -> Result<(), RfbClientError> {
        if let Some((width, height)) = outcome.resized {
            self.scheduler.resize(width, height);
        }
        let pointer_moved = outcome
            .events
            .iter()
            .any(|e| matches!(e, ServerEvent::CursorMoved { .. }));
        self.publish(&outcome.damage, outcome.resized.is_some())?;
        *self.shared.cursor.lock() = self.framebuffer.cursor().clone();

        self.window.end_update(self.framebuffer.stats_mut());
        *self.shared.stats.lock() = *self.framebuffer.stats();

        for event in outcome.events {
            emit(&self.events, event).await;
        }
        if !outcome.damage.is_empty() {
            let scale = self.config.display.scaling_factor;
            let repaint = outcome.damage.iter().map(|r| r.scaled(scale)).collect();
            emit(&self.events, ServerEvent::FramebufferUpdated {
                damage: outcome.damage,
                repaint,
            })
            .await;
        }

        if let Some(format) = self.scheduler.take_pending_format() {
            self.switch_format(format).await?;
        }

        let defer = self.scheduler.defer();
        if should_defer(defer, self.input.available(), pointer_moved) {
            tokio::time::sleep(defer).await;
        }
        let request = self.scheduler.next_request();
        protocol::write_framebuffer_update_request(&mut self.output, request).await
    }

    /// Copy the finished update into the shared store.
    fn publish(&self, damage: &[Rect], replace: bool) -> Result<(), RfbClientError> {
        let working = self.framebuffer.store();
        let mut shared = self.shared.framebuffer.lock();
        if replace
            || shared.width() != working.width()
            || shared.height() != working.height()
            || shared.format() != working.format()
        {
            *shared = working.clone();
            return Ok(());
        }
        for rect in damage {
            shared
                .copy_region_from(working, *rect)
                .map_err(|e| RfbClientError::Internal(format!("publish failed: {e:#}")))?;
        }
        Ok(())
    }

    async fn switch_format(&mut self, format: PixelFormat) -> Result<(), RfbClientError> {
        protocol::write_set_pixel_format(&mut self.output, format).await?;
        self.framebuffer.set_pixel_format(format);
        *self.shared.framebuffer.lock() = self.framebuffer.store().clone();
        Ok(())
    }

    async fn handle_command(&mut self, command: ClientCommand) -> Result<(), RfbClientError> {
        match command {
            ClientCommand::RequestUpdate { incremental, rect } => {
                if let Some(request) = self.scheduler.explicit_request(incremental, rect) {
                    protocol::write_framebuffer_update_request(&mut self.output, request).await?;
                }
            }
            ClientCommand::SetPixelDepth(depth) => match PixelFormat::for_depth(depth) {
                Ok(format) => self.scheduler.set_pending_format(format),
                Err(e) => tracing::warn!("Ignoring pixel depth change: {e:#}"),
            },
            ClientCommand::Close => {}
        }
        Ok(())
    }
}

/// Hold back the next request only when nothing is buffered and the pointer
/// did not move.
fn should_defer(defer: Duration, buffered: usize, pointer_moved: bool) -> bool {
    !defer.is_zero() && buffered == 0 && !pointer_moved
}

async fn emit(events: &flume::Sender<ServerEvent>, event: ServerEvent) {
    // A dropped receiver only means nobody is listening.
    let _ = events.send_async(event).await;
}
