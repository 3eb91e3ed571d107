//! Latest-wins result slot shared by live streaming and playback.
//!
//! Renderers call `subscribe()` and redraw whenever the slot changes. There is
//! no history: each `apply`/`publish` replaces the previous value.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::MalformedResultError;
use crate::model::DetectionResult;

/// Playback position attached to frames published by the sequence player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackProgress {
    pub total_source_frame_count: u64,
    pub processed_frame_count: usize,
    /// 1-based position of the displayed frame
    pub current_frame_number: usize,
}

/// What the renderer draws
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame {
    pub result: Arc<DetectionResult>,
    /// `None` for live results
    pub progress: Option<PlaybackProgress>,
}

impl RenderedFrame {
    pub fn live(result: DetectionResult) -> Self {
        Self {
            result: Arc::new(result),
            progress: None,
        }
    }
}

/// Single-slot holder of the most recent result. Clones share the slot.
#[derive(Debug, Clone)]
pub struct ResultSink {
    slot: Arc<watch::Sender<Option<RenderedFrame>>>,
}

impl Default for ResultSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Overwrite the held value with a live result.
    pub fn apply(&self, result: DetectionResult) {
        self.publish(RenderedFrame::live(result));
    }

    /// Parse an inbound payload and apply it.
    ///
    /// A malformed payload leaves the held value untouched.
    pub fn apply_message(&self, text: &str) -> Result<(), MalformedResultError> {
        let result = DetectionResult::from_json(text)?;
        self.apply(result);
        Ok(())
    }

    pub fn publish(&self, frame: RenderedFrame) {
        self.slot.send_replace(Some(frame));
    }

    pub fn latest(&self) -> Option<RenderedFrame> {
        self.slot.borrow().clone()
    }

    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RenderedFrame>> {
        self.slot.subscribe()
    }
}
