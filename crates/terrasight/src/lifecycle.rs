//! Capture session lifecycle.
//!
//! `LifecycleController` owns the camera device and the stream channel of at
//! most one session at a time. Everything a session touches lives in one
//! `SessionContext`, built per `start()` and handed to the capture loop, so
//! sessions never share state through globals.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::camera::{CameraDevice, CameraSource, SharedDevice};
use crate::channel::{ChannelState, StreamChannel, Transport};
use crate::config::StudioConfig;
use crate::encoder::{EncodeFrame, FrameEncoder};
use crate::error::{ChannelError, DeviceError, SessionError};
use crate::frame::FrameMetadata;
use crate::scheduler::{
    CaptureExit, CaptureScheduler, CaptureStats, CaptureStatsSnapshot, RetryPolicy,
};
use crate::sink::ResultSink;
use crate::transport::WebSocketTransport;

pub type Result<T> = std::result::Result<T, SessionError>;

// ── Session context ─────────────────────────────────────────────────

/// Resources of one capture session.
#[derive(Clone)]
pub struct SessionContext {
    pub device: SharedDevice,
    pub channel: Arc<StreamChannel>,
    pub encoder: Arc<dyn EncodeFrame>,
    pub stats: Arc<CaptureStats>,
    active: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl SessionContext {
    pub fn new(
        device: SharedDevice,
        channel: Arc<StreamChannel>,
        encoder: Arc<dyn EncodeFrame>,
    ) -> Self {
        Self {
            device,
            channel,
            encoder,
            stats: Arc::new(CaptureStats::default()),
            active: Arc::new(AtomicBool::new(true)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Liveness flag checked by the capture loop after every await.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Release the camera. Only the first call reaches the device.
    pub async fn release_device(&self) -> std::result::Result<(), DeviceError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut device = self.device.lock().await;
        device.release()
    }
}

/// A running session: its context plus the capture task.
pub struct CaptureSession {
    ctx: SessionContext,
    shutdown: watch::Sender<()>,
    capture: Option<JoinHandle<CaptureExit>>,
    ended: watch::Receiver<Option<CaptureExit>>,
}

impl CaptureSession {
    /// Spawn the capture loop over `ctx`.
    ///
    /// If the loop ends on its own (channel loss, device loss) the task closes
    /// the channel, releases the device and clears `sink` before reporting the
    /// exit.
    fn launch(ctx: SessionContext, policy: RetryPolicy, sink: ResultSink) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(());
        let (ended_tx, ended) = watch::channel(None);
        let scheduler = CaptureScheduler::new(ctx.clone(), policy);
        let task_ctx = ctx.clone();

        let capture = tokio::spawn(async move {
            let exit = scheduler.run(shutdown_rx).await;
            if !matches!(exit, CaptureExit::Shutdown) {
                log::warn!(
                    "[Session] capture ended on its own ({:?}), releasing resources",
                    exit
                );
                if let Err(e) = task_ctx.channel.close().await {
                    log::warn!("[Session] channel close failed: {}", e);
                }
                if let Err(e) = task_ctx.release_device().await {
                    log::warn!("[Session] device release failed: {}", e);
                }
                sink.clear();
            }
            ended_tx.send_replace(Some(exit.clone()));
            exit
        });

        Self {
            ctx,
            shutdown,
            capture: Some(capture),
            ended,
        }
    }

    /// Session without a capture loop, used to unwind a failed start.
    fn unlaunched(ctx: SessionContext) -> Self {
        let (shutdown, _) = watch::channel(());
        let (_, ended) = watch::channel(None);
        Self {
            ctx,
            shutdown,
            capture: None,
            ended,
        }
    }

    /// Cancel capture, close the channel, release the device.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned once all of them have been attempted.
    async fn teardown(mut self, capture_stop_timeout: std::time::Duration) -> Result<()> {
        let mut first_error = None;

        self.ctx.deactivate();
        let _ = self.shutdown.send(());
        if let Some(mut handle) = self.capture.take() {
            match tokio::time::timeout(capture_stop_timeout, &mut handle).await {
                Ok(Ok(exit)) => log::debug!("[Session] capture loop finished: {:?}", exit),
                Ok(Err(e)) => record(
                    &mut first_error,
                    "capture task",
                    SessionError::Capture(e.to_string()),
                ),
                Err(_) => {
                    log::warn!(
                        "[Session] capture attempt still running after {:?}, aborting",
                        capture_stop_timeout
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        if let Err(e) = self.ctx.channel.close().await {
            record(&mut first_error, "channel close", e.into());
        }
        if let Err(e) = self.ctx.release_device().await {
            record(&mut first_error, "device release", e.into());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn record(first_error: &mut Option<SessionError>, step: &str, err: SessionError) {
    log::error!("[Session] {} failed: {}", step, err);
    if first_error.is_none() {
        *first_error = Some(err);
    }
}

// ── Controller ──────────────────────────────────────────────────────

enum SessionSlot {
    Idle,
    Starting {
        cancel: watch::Sender<bool>,
        settled: watch::Receiver<bool>,
    },
    Active(CaptureSession),
    Stopping {
        settled: watch::Receiver<bool>,
    },
}

enum StopAction {
    Nothing,
    /// Another start or stop owns the teardown; wait for it to settle
    Wait(watch::Receiver<bool>),
    Teardown(CaptureSession),
}

/// Resets the slot to `Idle` and signals waiters when dropped, unless disarmed.
///
/// Covers every exit of `start()`/`stop()`, including their futures being
/// dropped mid-way.
struct SettleGuard<'a> {
    slot: &'a Mutex<SessionSlot>,
    settled: watch::Sender<bool>,
    armed: bool,
}

impl SettleGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *lock(self.slot) = SessionSlot::Idle;
        }
        self.settled.send_replace(true);
    }
}

fn lock(slot: &Mutex<SessionSlot>) -> MutexGuard<'_, SessionSlot> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Resolve once `stop()` has asked the pending start to give up.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|requested| *requested).await;
}

async fn until_cancelled<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Err(SessionError::Cancelled),
        output = fut => Ok(output),
    }
}

pub struct LifecycleController {
    config: StudioConfig,
    camera: Arc<dyn CameraSource>,
    transport: Arc<dyn Transport>,
    encoder: Arc<dyn EncodeFrame>,
    sink: ResultSink,
    slot: Mutex<SessionSlot>,
}

impl LifecycleController {
    pub fn new(
        config: StudioConfig,
        camera: Arc<dyn CameraSource>,
        transport: Arc<dyn Transport>,
        encoder: Arc<dyn EncodeFrame>,
    ) -> Self {
        Self {
            config,
            camera,
            transport,
            encoder,
            sink: ResultSink::new(),
            slot: Mutex::new(SessionSlot::Idle),
        }
    }

    /// WebSocket transport and the built-in encoder.
    pub fn with_defaults(config: StudioConfig, camera: Arc<dyn CameraSource>) -> Self {
        let encoder = Arc::new(FrameEncoder::new(config.encoder.clone()));
        Self::new(config, camera, Arc::new(WebSocketTransport), encoder)
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    /// Rendering contract shared by live results.
    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    pub fn is_active(&self) -> bool {
        match &*lock(&self.slot) {
            SessionSlot::Active(session) => session.ctx.is_active(),
            _ => false,
        }
    }

    pub fn channel_state(&self) -> ChannelState {
        match &*lock(&self.slot) {
            SessionSlot::Active(session) => session.ctx.channel.state(),
            _ => ChannelState::Closed,
        }
    }

    pub fn capture_stats(&self) -> Option<CaptureStatsSnapshot> {
        match &*lock(&self.slot) {
            SessionSlot::Active(session) => Some(session.ctx.stats.snapshot()),
            _ => None,
        }
    }

    /// Acquire the camera, open the channel and start capturing.
    ///
    /// Fails with `AlreadyActive` while a live session exists. A session whose
    /// capture ended on its own is torn down first.
    pub async fn start(&self) -> Result<()> {
        let (cancel_tx, mut cancel) = watch::channel(false);
        let (settled_tx, settled) = watch::channel(false);
        let ended = {
            let mut slot = lock(&self.slot);
            let ended = match std::mem::replace(&mut *slot, SessionSlot::Idle) {
                SessionSlot::Idle => None,
                // Capture died on its own; the session is reaped below.
                SessionSlot::Active(session) if !session.ctx.is_active() => Some(session),
                other => {
                    *slot = other;
                    return Err(SessionError::AlreadyActive);
                }
            };
            *slot = SessionSlot::Starting {
                cancel: cancel_tx,
                settled,
            };
            ended
        };
        let guard = SettleGuard {
            slot: &self.slot,
            settled: settled_tx,
            armed: true,
        };

        if let Some(session) = ended {
            log::info!("[Session] reaping session that ended on its own");
            if let Err(e) = session
                .teardown(self.config.session.capture_stop_timeout())
                .await
            {
                log::warn!("[Session] teardown of ended session failed: {}", e);
            }
            self.sink.clear();
        }

        log::info!("[Session] starting (stream {})", self.config.stream_url);
        let session = self.establish(&mut cancel).await?;

        // stop() flips `cancel` under the same lock, so this check cannot race it.
        let session = {
            let mut slot = lock(&self.slot);
            if *cancel.borrow() {
                Some(session)
            } else {
                *slot = SessionSlot::Active(session);
                None
            }
        };
        match session {
            None => {
                guard.disarm();
                log::info!("[Session] active");
                Ok(())
            }
            Some(session) => {
                log::info!("[Session] start cancelled after setup, tearing down");
                if let Err(e) = session
                    .teardown(self.config.session.capture_stop_timeout())
                    .await
                {
                    log::warn!("[Session] teardown of cancelled start failed: {}", e);
                }
                self.sink.clear();
                Err(SessionError::Cancelled)
            }
        }
    }

    /// Stop the session. Idempotent; safe before `start()` has settled.
    pub async fn stop(&self) -> Result<()> {
        let (done_tx, done) = watch::channel(false);
        let action = {
            let mut slot = lock(&self.slot);
            match std::mem::replace(&mut *slot, SessionSlot::Idle) {
                SessionSlot::Idle => StopAction::Nothing,
                SessionSlot::Starting { cancel, settled } => {
                    log::info!("[Session] stop requested during start, cancelling");
                    cancel.send_replace(true);
                    let waiter = settled.clone();
                    *slot = SessionSlot::Starting { cancel, settled };
                    StopAction::Wait(waiter)
                }
                SessionSlot::Stopping { settled } => {
                    let waiter = settled.clone();
                    *slot = SessionSlot::Stopping { settled };
                    StopAction::Wait(waiter)
                }
                SessionSlot::Active(session) => {
                    *slot = SessionSlot::Stopping { settled: done };
                    StopAction::Teardown(session)
                }
            }
        };

        let session = match action {
            StopAction::Nothing => {
                log::debug!("[Session] stop with no session");
                return Ok(());
            }
            StopAction::Wait(mut waiter) => {
                let _ = waiter.wait_for(|settled| *settled).await;
                return Ok(());
            }
            StopAction::Teardown(session) => session,
        };
        let _guard = SettleGuard {
            slot: &self.slot,
            settled: done_tx,
            armed: true,
        };

        log::info!("[Session] stopping");
        let result = session
            .teardown(self.config.session.capture_stop_timeout())
            .await;
        self.sink.clear();
        match &result {
            Ok(()) => log::info!("[Session] stopped"),
            Err(e) => log::error!("[Session] stopped with error: {}", e),
        }
        result
    }

    /// Wait for the capture loop to end.
    ///
    /// Returns `Ok` when the session was stopped (or there is none) and the
    /// channel or device error when it died on its own.
    pub async fn join(&self) -> Result<()> {
        let mut ended = match &*lock(&self.slot) {
            SessionSlot::Active(session) => session.ended.clone(),
            _ => return Ok(()),
        };
        let exit = match ended.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };
        match exit {
            None | Some(CaptureExit::Shutdown) => Ok(()),
            Some(CaptureExit::ChannelClosed) => Err(ChannelError::UnexpectedClose.into()),
            Some(CaptureExit::DeviceLost(e)) => Err(e.into()),
        }
    }

    /// Acquire → metadata → open channel → launch capture, unwinding on failure.
    async fn establish(&self, cancel: &mut watch::Receiver<bool>) -> Result<CaptureSession> {
        let mut device = until_cancelled(cancel, self.camera.acquire())
            .await?
            .map_err(|e| {
                log::error!("[Session] camera acquisition failed: {}", e);
                SessionError::from(e)
            })?;

        let metadata = until_cancelled(cancel, self.wait_for_metadata(device.as_mut()))
            .await
            .and_then(|waited| waited);
        let metadata = match metadata {
            Ok(metadata) => metadata,
            Err(e) => {
                if let Err(release) = device.release() {
                    log::warn!("[Session] device release failed: {}", release);
                }
                return Err(e);
            }
        };
        log::info!(
            "[Session] camera ready ({}x{})",
            metadata.width,
            metadata.height
        );

        let channel = Arc::new(StreamChannel::new(
            self.config.stream_url.clone(),
            self.config.model.key(),
            self.config.channel.clone(),
            self.transport.clone(),
            self.sink.clone(),
        ));
        let ctx = SessionContext::new(
            Arc::new(tokio::sync::Mutex::new(device)),
            channel.clone(),
            self.encoder.clone(),
        );

        let opened = until_cancelled(cancel, channel.open())
            .await
            .and_then(|open| open.map_err(SessionError::from));
        if let Err(e) = opened {
            let unwound = CaptureSession::unlaunched(ctx)
                .teardown(self.config.session.capture_stop_timeout())
                .await;
            if let Err(unwind) = unwound {
                log::warn!("[Session] unwinding failed start: {}", unwind);
            }
            return Err(e);
        }

        Ok(CaptureSession::launch(
            ctx,
            RetryPolicy::from(&self.config.capture),
            self.sink.clone(),
        ))
    }

    async fn wait_for_metadata(&self, device: &mut dyn CameraDevice) -> Result<FrameMetadata> {
        let timeout = self.config.session.metadata_timeout();
        let metadata = tokio::time::timeout(timeout, device.metadata())
            .await
            .map_err(|_| DeviceError::MetadataTimeout(timeout))??;
        if !metadata.is_valid() {
            return Err(DeviceError::InvalidMetadata {
                width: metadata.width,
                height: metadata.height,
            }
            .into());
        }
        Ok(metadata)
    }
}
