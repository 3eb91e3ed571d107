//! Self-pacing capture loop.
//!
//! Each attempt grabs a frame, encodes it, and pushes it through the channel.
//! The next attempt is armed only after the current one has settled, so at
//! most one encode/send is ever in flight; the delay before it depends on how
//! the attempt ended. Inter-attempt spacing therefore has a lower bound but no
//! fixed period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{ChannelState, SendOutcome};
use crate::config::CaptureConfig;
use crate::error::{DeviceError, EncodeError};
use crate::lifecycle::SessionContext;

/// How a single capture attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Sent,
    /// Channel stopped being open between the check and the send
    Dropped,
    /// Device had no frame yet
    NotReady,
    EncodeFailed,
    /// Channel connecting or closing; nothing was grabbed
    ChannelNotOpen,
    SendFailed,
}

/// Why the capture loop stopped.
#[derive(Debug, Clone)]
pub enum CaptureExit {
    /// Shutdown requested or session liveness cleared
    Shutdown,
    /// The channel closed underneath an active session
    ChannelClosed,
    /// The camera failed in a way that will not recover
    DeviceLost(DeviceError),
}

/// Delay policy for re-arming the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_interval: Duration,
    pub not_ready_delay: Duration,
    pub encode_backoff: Duration,
    pub encode_backoff_max: Duration,
}

impl From<&CaptureConfig> for RetryPolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            base_interval: config.base_interval(),
            not_ready_delay: config.not_ready_delay(),
            encode_backoff: config.encode_backoff(),
            encode_backoff_max: config.encode_backoff_max(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt.
    ///
    /// Encode failures back off exponentially: `encode_backoff * 2^(n-1)`
    /// for the n-th consecutive failure, capped at `encode_backoff_max`.
    pub fn delay_for(&self, outcome: AttemptOutcome, consecutive_encode_failures: u32) -> Duration {
        match outcome {
            AttemptOutcome::NotReady => self.not_ready_delay,
            AttemptOutcome::EncodeFailed => {
                let exponent = consecutive_encode_failures.saturating_sub(1);
                let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
                self.encode_backoff
                    .saturating_mul(factor)
                    .min(self.encode_backoff_max)
            }
            AttemptOutcome::Sent
            | AttemptOutcome::Dropped
            | AttemptOutcome::ChannelNotOpen
            | AttemptOutcome::SendFailed => self.base_interval,
        }
    }
}

/// Capture counters, shared with the controller for observation.
#[derive(Debug, Default)]
pub struct CaptureStats {
    attempts: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    not_ready: AtomicU64,
    encode_failures: AtomicU64,
    send_failures: AtomicU64,
    channel_not_open: AtomicU64,
    consecutive_encode_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    pub attempts: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub not_ready: u64,
    pub encode_failures: u64,
    pub send_failures: u64,
    pub channel_not_open: u64,
    pub consecutive_encode_failures: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            channel_not_open: self.channel_not_open.load(Ordering::Relaxed),
            consecutive_encode_failures: self
                .consecutive_encode_failures
                .load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct CaptureScheduler {
    ctx: SessionContext,
    policy: RetryPolicy,
    consecutive_encode_failures: u32,
}

impl CaptureScheduler {
    pub fn new(ctx: SessionContext, policy: RetryPolicy) -> Self {
        Self {
            ctx,
            policy,
            consecutive_encode_failures: 0,
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self, shutdown: watch::Receiver<()>) -> JoinHandle<CaptureExit> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until shutdown, channel loss, or device loss.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) -> CaptureExit {
        log::info!(
            "[Capture] loop starting (base interval {:?})",
            self.policy.base_interval
        );

        loop {
            if !self.ctx.is_active() {
                log::info!("[Capture] session inactive, exiting");
                return CaptureExit::Shutdown;
            }

            let outcome = match self.attempt().await {
                Ok(outcome) => outcome,
                Err(exit) => {
                    self.ctx.deactivate();
                    log::info!("[Capture] loop exiting: {:?}", exit);
                    return exit;
                }
            };

            let delay = self
                .policy
                .delay_for(outcome, self.consecutive_encode_failures);
            log::trace!("[Capture] {:?}, next attempt in {:?}", outcome, delay);

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    log::info!("[Capture] shutdown signal received, exiting");
                    return CaptureExit::Shutdown;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One grab → encode → send cycle.
    ///
    /// Liveness is re-checked after every await so that an attempt finishing
    /// after `stop()` never touches the released channel.
    async fn attempt(&mut self) -> Result<AttemptOutcome, CaptureExit> {
        let stats = &self.ctx.stats;
        CaptureStats::bump(&stats.attempts);

        match self.ctx.channel.state() {
            ChannelState::Open => {}
            ChannelState::Closed => {
                log::warn!("[Capture] channel closed, ending capture");
                return Err(CaptureExit::ChannelClosed);
            }
            ChannelState::Connecting | ChannelState::Closing => {
                CaptureStats::bump(&stats.channel_not_open);
                return Ok(AttemptOutcome::ChannelNotOpen);
            }
        }

        let grabbed = {
            let mut device = self.ctx.device.lock().await;
            device.grab_frame().await
        };
        let frame = match grabbed {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                CaptureStats::bump(&stats.not_ready);
                return Ok(AttemptOutcome::NotReady);
            }
            Err(e) => {
                log::error!("[Capture] device failure: {}", e);
                return Err(CaptureExit::DeviceLost(e));
            }
        };
        if !self.ctx.is_active() {
            return Err(CaptureExit::Shutdown);
        }

        let encoded = match self.ctx.encoder.encode(frame).await {
            Ok(encoded) => {
                self.consecutive_encode_failures = 0;
                stats.consecutive_encode_failures.store(0, Ordering::Relaxed);
                encoded
            }
            Err(EncodeError::SourceNotReady) => {
                CaptureStats::bump(&stats.not_ready);
                return Ok(AttemptOutcome::NotReady);
            }
            Err(e) => {
                self.consecutive_encode_failures =
                    self.consecutive_encode_failures.saturating_add(1);
                CaptureStats::bump(&stats.encode_failures);
                stats
                    .consecutive_encode_failures
                    .store(self.consecutive_encode_failures as u64, Ordering::Relaxed);
                if self.consecutive_encode_failures == 1 {
                    log::warn!("[Capture] encode failed: {}", e);
                } else {
                    log::debug!(
                        "[Capture] encode failed ({} in a row): {}",
                        self.consecutive_encode_failures,
                        e
                    );
                }
                return Ok(AttemptOutcome::EncodeFailed);
            }
        };
        if !self.ctx.is_active() {
            return Err(CaptureExit::Shutdown);
        }

        match self.ctx.channel.send_frame(&encoded).await {
            Ok(SendOutcome::Sent) => {
                CaptureStats::bump(&stats.frames_sent);
                Ok(AttemptOutcome::Sent)
            }
            Ok(SendOutcome::Dropped) => {
                CaptureStats::bump(&stats.frames_dropped);
                Ok(AttemptOutcome::Dropped)
            }
            Err(e) => {
                CaptureStats::bump(&stats.send_failures);
                log::warn!("[Capture] {}", e);
                Ok(AttemptOutcome::SendFailed)
            }
        }
    }
}
