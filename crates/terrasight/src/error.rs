//! Error types for the detection client.
//!
//! Only device and connection failures ever reach the caller of a session.
//! Per-frame problems (encode, send, malformed results) are absorbed by the
//! capture loop and the result sink; their types exist so those layers can
//! log and count them.

use thiserror::Error;

/// Camera device failures. Acquisition variants abort `start()`.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The user or platform refused camera access
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    /// No camera present, or it is held by another process
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    /// The device never reported stream dimensions
    #[error("Timed out waiting for camera metadata after {0:?}")]
    MetadataTimeout(std::time::Duration),

    /// The device reported a zero-sized stream
    #[error("Invalid camera metadata: {width}x{height}")]
    InvalidMetadata { width: u32, height: u32 },

    /// Grabbing a frame failed in a way that will not recover
    #[error("Capture error: {0}")]
    Capture(String),

    /// Releasing the device tracks failed
    #[error("Release error: {0}")]
    Release(String),
}

/// Streaming channel failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The server or network closed a channel that was OPEN
    #[error("Channel closed unexpectedly")]
    UnexpectedClose,

    #[error("Channel already open or opening")]
    AlreadyOpen,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

/// Frame encoding failures. Never surfaced past the capture loop.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The frame holds no pixels yet
    #[error("Frame source not ready")]
    SourceNotReady,

    #[error("Zero-dimension frame: {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    /// The pixel buffer does not match the declared geometry
    #[error("Rendering surface unavailable: {0}")]
    SurfaceUnavailable(String),

    #[error("Codec error: {0}")]
    Codec(String),

    /// The blocking encode worker died
    #[error("Encode worker error: {0}")]
    Worker(String),
}

impl From<image::ImageError> for EncodeError {
    fn from(err: image::ImageError) -> Self {
        EncodeError::Codec(err.to_string())
    }
}

/// The transport rejected a frame send. Transient.
#[derive(Debug, Error)]
#[error("Frame send failed: {0}")]
pub struct SendFailure(pub String);

impl From<ChannelError> for SendFailure {
    fn from(err: ChannelError) -> Self {
        SendFailure(err.to_string())
    }
}

/// An inbound payload that is not a detection result.
#[derive(Debug, Error)]
#[error("Malformed result: {0}")]
pub struct MalformedResultError(pub String);

impl From<serde_json::Error> for MalformedResultError {
    fn from(err: serde_json::Error) -> Self {
        MalformedResultError(err.to_string())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Result sequence and playback errors.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Result sequence is empty")]
    EmptySequence,

    #[error("Frame index {index} out of range for {len} frames")]
    OutOfRange { index: usize, len: usize },
}

/// Errors surfaced by `LifecycleController`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session is already starting or running on this controller
    #[error("Capture session already active")]
    AlreadyActive,

    /// `stop()` was called while `start()` was still in progress
    #[error("Session start cancelled")]
    Cancelled,

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The capture task panicked or could not be joined
    #[error("Capture task error: {0}")]
    Capture(String),
}
