//! Per-connection decoder state.
//!
//! Everything that must survive from one rectangle to the next lives in
//! [`DecoderState`]: the persistent inflate streams, the JPEG wait policy and
//! the cursor handling options. One value belongs to exactly one connection
//! and is dropped with it.

use crate::zlib_pool::ZlibStreamPool;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_JPEG_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_ZRLE_LENGTH: usize = 64 * 1024 * 1024;

/// Tunables copied from the client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSettings {
    pub jpeg_timeout: Duration,
    pub max_zrle_length: usize,
    pub ignore_cursor_updates: bool,
    pub cursor_scale_percent: u32,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            jpeg_timeout: DEFAULT_JPEG_TIMEOUT,
            max_zrle_length: DEFAULT_MAX_ZRLE_LENGTH,
            ignore_cursor_updates: false,
            cursor_scale_percent: 100,
        }
    }
}

/// Observes connection shutdown.
///
/// Backed by a `watch` channel: the session is cancelled once the sender
/// publishes `true` or is dropped.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// A connected sender/signal pair.
    pub fn pair() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx: Some(rx) })
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.rx {
            None => false,
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
        }
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Debug)]
pub struct DecoderState {
    pub zlib: ZlibStreamPool,
    pub settings: DecoderSettings,
    pub cancel: CancelSignal,
}

impl DecoderState {
    pub fn new(settings: DecoderSettings, cancel: CancelSignal) -> Self {
        Self {
            zlib: ZlibStreamPool::new(),
            settings,
            cancel,
        }
    }
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::new(DecoderSettings::default(), CancelSignal::never())
    }
}
