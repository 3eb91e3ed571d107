//! Persistent bidirectional connection to the detection server.
//!
//! State machine: `Closed → Connecting → Open → Closing → Closed`. A transport
//! error or server-side close from any state goes straight to `Closed`.
//!
//! The config message is written while the channel is still `Connecting`, and
//! the state only flips to `Open` afterwards, so it always precedes the first
//! frame. Frame sends are gated on `Open` and never queued: a send attempted in
//! any other state, or while a previous send still owns the write half, is
//! dropped.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, SendFailure};
use crate::frame::EncodedFrame;
use crate::protocol::OutboundMessage;
use crate::sink::ResultSink;

// ── Transport seam ──────────────────────────────────────────────────

/// Outbound half of a connection: text messages.
pub type TextSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of a connection. Ends when the peer closes.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// An established, message-framed connection.
pub struct Connection {
    pub sink: TextSink,
    pub stream: TextStream,
}

/// Opens connections. Implemented over WebSocket in `transport`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection, ChannelError>;
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// What happened to a frame handed to `send_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Channel not open or writer busy; the frame was discarded
    Dropped,
}

#[derive(Debug, Default)]
struct ChannelStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    results_received: AtomicU64,
    malformed_results: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub results_received: u64,
    pub malformed_results: u64,
}

// ── Channel ─────────────────────────────────────────────────────────

pub struct StreamChannel {
    url: String,
    model: String,
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    results: ResultSink,
    state: Arc<watch::Sender<ChannelState>>,
    writer: tokio::sync::Mutex<Option<TextSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every open/close so a stale open cannot resurrect the channel
    generation: AtomicU64,
    stats: Arc<ChannelStats>,
}

impl StreamChannel {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        config: ChannelConfig,
        transport: Arc<dyn Transport>,
        results: ResultSink,
    ) -> Self {
        let (state, _rx) = watch::channel(ChannelState::Closed);
        Self {
            url: url.into(),
            model: model.into(),
            config,
            transport,
            results,
            state: Arc::new(state),
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            generation: AtomicU64::new(0),
            stats: Arc::new(ChannelStats::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Resolve once the channel is `Closed`.
    pub async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ChannelState::Closed).await;
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            results_received: self.stats.results_received.load(Ordering::Relaxed),
            malformed_results: self.stats.malformed_results.load(Ordering::Relaxed),
        }
    }

    /// Connect, send the config message, and start delivering results.
    pub async fn open(&self) -> Result<(), ChannelError> {
        let config = OutboundMessage::config(&self.model).to_text()?;
        let claimed = self.state.send_if_modified(|state| {
            if *state == ChannelState::Closed {
                *state = ChannelState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ChannelError::AlreadyOpen);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        log::info!("[Channel] connecting to {}", self.url);
        let timeout = self.config.connect_timeout();
        let connection =
            match tokio::time::timeout(timeout, self.transport.connect(&self.url)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => {
                    log::error!("[Channel] connect to {} failed: {}", self.url, e);
                    self.abandon_open(generation);
                    return Err(e);
                }
                Err(_) => {
                    log::error!("[Channel] connect to {} timed out", self.url);
                    self.abandon_open(generation);
                    return Err(ChannelError::ConnectTimeout(timeout));
                }
            };

        let Connection { mut sink, stream } = connection;
        let mut writer = self.writer.lock().await;
        if !self.still_connecting(generation) {
            let _ = sink.close().await;
            return Err(ChannelError::Connect(
                "channel closed while connecting".to_string(),
            ));
        }

        if let Err(e) = sink.send(config).await {
            log::error!("[Channel] failed to send config: {}", e);
            self.abandon_open(generation);
            return Err(e);
        }
        log::debug!("[Channel] config sent (model={})", self.model);
        *writer = Some(sink);

        let handle = tokio::spawn(read_loop(
            stream,
            self.results.clone(),
            self.state.clone(),
            self.stats.clone(),
        ));
        if let Some(stale) = self.swap_reader(Some(handle)) {
            stale.abort();
        }

        let opened = self.state.send_if_modified(|state| {
            if *state == ChannelState::Connecting {
                *state = ChannelState::Open;
                true
            } else {
                false
            }
        });
        drop(writer);

        if !opened {
            // close() or a transport failure won the race; it owns cleanup.
            return Err(ChannelError::Connect(
                "channel closed during handshake".to_string(),
            ));
        }
        log::info!("[Channel] open ({})", self.url);
        Ok(())
    }

    /// Send one encoded frame if, and only if, the channel is open.
    pub async fn send_frame(&self, encoded: &EncodedFrame) -> Result<SendOutcome, SendFailure> {
        if self.state() != ChannelState::Open {
            return Ok(self.dropped());
        }
        let Ok(mut writer) = self.writer.try_lock() else {
            return Ok(self.dropped());
        };
        // Re-check under the writer lock: close() may have started.
        if self.state() != ChannelState::Open {
            return Ok(self.dropped());
        }
        let Some(sink) = writer.as_mut() else {
            return Ok(self.dropped());
        };

        let text = OutboundMessage::frame(encoded).to_text()?;
        sink.send(text).await?;
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(SendOutcome::Sent)
    }

    /// Close the channel. Always ends in `Closed`, even if the transport never
    /// confirms; waiting for confirmation is bounded by `close_timeout`.
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.state();
        if previous != ChannelState::Closed {
            self.state.send_replace(ChannelState::Closing);
            log::info!("[Channel] closing ({:?} -> Closing)", previous);
        }

        let timeout = self.config.close_timeout();
        let flushed = tokio::time::timeout(timeout, async {
            let mut writer = self.writer.lock().await;
            match writer.take() {
                Some(mut sink) => sink.close().await,
                None => Ok(()),
            }
        })
        .await;

        if let Some(reader) = self.swap_reader(None) {
            reader.abort();
        }
        self.state.send_replace(ChannelState::Closed);

        match flushed {
            Ok(Ok(())) => {
                log::debug!("[Channel] closed");
                Ok(())
            }
            Ok(Err(e)) if previous == ChannelState::Open => {
                log::warn!("[Channel] transport error while closing: {}", e);
                Err(e)
            }
            Ok(Err(e)) => {
                log::debug!("[Channel] ignoring close error on {:?} channel: {}", previous, e);
                Ok(())
            }
            Err(_) => {
                log::warn!("[Channel] close not confirmed within {:?}", timeout);
                Ok(())
            }
        }
    }

    fn dropped(&self) -> SendOutcome {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        SendOutcome::Dropped
    }

    fn still_connecting(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
            && self.state() == ChannelState::Connecting
    }

    fn abandon_open(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.state.send_replace(ChannelState::Closed);
        }
    }

    fn swap_reader(&self, handle: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut guard = match self.reader.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, handle)
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.swap_reader(None) {
            reader.abort();
        }
    }
}

/// Deliver inbound messages to the sink in receipt order until the stream ends.
async fn read_loop(
    mut stream: TextStream,
    results: ResultSink,
    state: Arc<watch::Sender<ChannelState>>,
    stats: Arc<ChannelStats>,
) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(text)) => {
                stats.results_received.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = results.apply_message(&text) {
                    stats.malformed_results.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[Channel] dropping result ({} bytes): {}", text.len(), e);
                }
            }
            Some(Err(e)) => break format!("transport error: {}", e),
            None => break "stream ended".to_string(),
        }
    };

    let previous = state.send_replace(ChannelState::Closed);
    if previous == ChannelState::Open {
        log::warn!("[Channel] closed unexpectedly: {}", reason);
    } else {
        log::debug!("[Channel] reader finished in {:?}: {}", previous, reason);
    }
}
