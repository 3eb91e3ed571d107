//! Test doubles for session-level tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::Sink;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use terrasight::channel::{Connection, Transport};
use terrasight::{
    CameraDevice, CameraSource, ChannelError, DeviceError, EncodeError, EncodeFrame, EncodedFrame,
    Frame, FrameMetadata, ImageFormat, LifecycleController, PixelFormat, StudioConfig,
};

// ── Transport ───────────────────────────────────────────────────────

/// In-memory server. Records every outbound message and lets the test push
/// results into, or hang up, the latest connection.
#[derive(Clone, Default)]
pub struct MockTransport {
    outbound: Arc<Mutex<Vec<(usize, String)>>>,
    inbound: Arc<Mutex<Vec<Option<mpsc::UnboundedSender<Result<String, ChannelError>>>>>>,
    refuse: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
    connect_delay: Arc<Mutex<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        let transport = Self::default();
        transport.refuse.store(true, Ordering::SeqCst);
        transport
    }

    pub fn with_connect_delay(delay: Duration) -> Self {
        let transport = Self::default();
        *transport.connect_delay.lock().unwrap() = delay;
        transport
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }

    /// Outbound messages of one connection, in send order.
    pub fn messages(&self, connection: usize) -> Vec<serde_json::Value> {
        self.outbound
            .lock()
            .unwrap()
            .iter()
            .filter(|(conn, _)| *conn == connection)
            .map(|(_, text)| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn count(&self, message_type: &str) -> usize {
        self.outbound
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, text)| text.contains(&format!("\"type\":\"{}\"", message_type)))
            .count()
    }

    pub fn frame_count(&self) -> usize {
        self.count("frame")
    }

    /// Deliver a message on the latest connection.
    pub fn push(&self, text: impl Into<String>) {
        let inbound = self.inbound.lock().unwrap();
        if let Some(Some(tx)) = inbound.last() {
            let _ = tx.unbounded_send(Ok(text.into()));
        }
    }

    /// Server-side hang-up of the latest connection.
    pub fn hang_up(&self) {
        let mut inbound = self.inbound.lock().unwrap();
        if let Some(slot) = inbound.last_mut() {
            slot.take();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str) -> Result<Connection, ChannelError> {
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded();
        let connection = {
            let mut inbound = self.inbound.lock().unwrap();
            inbound.push(Some(tx));
            inbound.len() - 1
        };

        let sink = RecordingSink {
            connection,
            outbound: self.outbound.clone(),
            fail: self.fail_sends.clone(),
        };

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(rx),
        })
    }
}

/// Write half of a mock connection. Failed sends leave it usable.
struct RecordingSink {
    connection: usize,
    outbound: Arc<Mutex<Vec<(usize, String)>>>,
    fail: Arc<AtomicBool>,
}

impl Sink<String> for RecordingSink {
    type Error = ChannelError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), ChannelError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, text: String) -> Result<(), ChannelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport("broken pipe".to_string()));
        }
        self.outbound.lock().unwrap().push((self.connection, text));
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), ChannelError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), ChannelError>> {
        Poll::Ready(Ok(()))
    }
}

// ── Camera ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CameraProbe {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub grabs: AtomicUsize,
}

/// Scripted camera.
#[derive(Clone, Default)]
pub struct MockCamera {
    pub probe: Arc<CameraProbe>,
    pub deny: bool,
    pub acquire_delay: Duration,
    pub metadata: Option<FrameMetadata>,
    /// Grabs that return no frame before frames start flowing
    pub not_ready_grabs: usize,
    /// Grab number after which the device fails hard
    pub fail_after: Option<usize>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> usize {
        self.probe.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.probe.released.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.probe.grabs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraSource for MockCamera {
    async fn acquire(&self) -> Result<Box<dyn CameraDevice>, DeviceError> {
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }
        if self.deny {
            return Err(DeviceError::PermissionDenied("user dismissed prompt".to_string()));
        }
        self.probe.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDevice {
            camera: self.clone(),
        }))
    }
}

struct MockDevice {
    camera: MockCamera,
}

#[async_trait]
impl CameraDevice for MockDevice {
    async fn metadata(&mut self) -> Result<FrameMetadata, DeviceError> {
        Ok(self.camera.metadata.unwrap_or(FrameMetadata {
            width: 4,
            height: 4,
        }))
    }

    async fn grab_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        let grab = self.camera.probe.grabs.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.camera.fail_after {
            if grab > limit {
                return Err(DeviceError::Capture("device unplugged".to_string()));
            }
        }
        if grab <= self.camera.not_ready_grabs {
            return Ok(None);
        }
        Ok(Some(
            Frame::new(4, 4, PixelFormat::Rgb8, vec![128; 48]).with_sequence(grab as u64),
        ))
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.camera.probe.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Encoder ─────────────────────────────────────────────────────────

/// Encoder that takes `delay` per frame and tracks concurrency.
#[derive(Default)]
pub struct CountingEncoder {
    pub delay: Duration,
    /// Calls that fail before encoding starts succeeding
    pub fail_first: usize,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingEncoder {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EncodeFrame for CountingEncoder {
    async fn encode(&self, frame: Frame) -> Result<EncodedFrame, EncodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call <= self.fail_first {
            return Err(EncodeError::Codec("scripted failure".to_string()));
        }
        Ok(EncodedFrame::new(
            "AQID".to_string(),
            ImageFormat::Jpeg,
            60,
            frame.width,
            frame.height,
            3,
        ))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

pub fn result_json(label: &str) -> String {
    format!(
        r#"{{"detections": [{{"label": "{}", "confidence": 0.75, "bbox": [0, 0, 2, 2]}}], "image": "data:image/jpeg;base64,AQID"}}"#,
        label
    )
}

pub fn controller(
    camera: &MockCamera,
    transport: &MockTransport,
    encoder: Arc<CountingEncoder>,
) -> LifecycleController {
    LifecycleController::new(
        StudioConfig::default(),
        Arc::new(camera.clone()),
        Arc::new(transport.clone()),
        encoder,
    )
}

/// Latest label shown by the controller's sink.
pub fn shown_label(controller: &LifecycleController) -> Option<String> {
    controller
        .sink()
        .latest()
        .map(|frame| frame.result.detections[0].label.clone())
}

/// Advance (virtual) time until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
