//! Configuration loading utilities.
//!
//! Every field has a default, so an empty YAML document is a valid config.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::frame::ImageFormat;
use crate::model::DetectionModel;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// WebSocket endpoint of the live detection stream
    pub stream_url: String,
    /// Base URL of the batch analysis HTTP API
    pub api_url: String,
    /// Model requested in the config message and batch uploads
    pub model: DetectionModel,
    pub encoder: EncoderConfig,
    pub capture: CaptureConfig,
    pub channel: ChannelConfig,
    pub session: SessionConfig,
    pub playback: PlaybackConfig,
    pub batch: BatchConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            stream_url: "ws://127.0.0.1:8000/detect-stream".to_string(),
            api_url: "http://127.0.0.1:8000".to_string(),
            model: DetectionModel::default(),
            encoder: EncoderConfig::default(),
            capture: CaptureConfig::default(),
            channel: ChannelConfig::default(),
            session: SessionConfig::default(),
            playback: PlaybackConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Frame encoding parameters. Defaults favor payload size over sharpness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub format: ImageFormat,
    /// Lossy quality, 1..=100 (ignored for PNG)
    pub quality: u8,
    /// Frames wider than this are downscaled; 0 keeps the source width
    pub max_width: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::Jpeg,
            quality: 60,
            max_width: 640,
        }
    }
}

/// Capture loop pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub base_interval_ms: u64,
    pub not_ready_delay_ms: u64,
    pub encode_backoff_ms: u64,
    pub encode_backoff_max_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 100,
            not_ready_delay_ms: 100,
            encode_backoff_ms: 200,
            encode_backoff_max_ms: 2000,
        }
    }
}

impl CaptureConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn not_ready_delay(&self) -> Duration {
        Duration::from_millis(self.not_ready_delay_ms)
    }

    pub fn encode_backoff(&self) -> Duration {
        Duration::from_millis(self.encode_backoff_ms)
    }

    pub fn encode_backoff_max(&self) -> Duration {
        Duration::from_millis(self.encode_backoff_max_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for the transport to confirm a close
    pub close_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            close_timeout_ms: 1000,
        }
    }
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long `start()` waits for the camera to report its dimensions
    pub metadata_timeout_ms: u64,
    /// How long `stop()` waits for an in-flight capture attempt before aborting it
    pub capture_stop_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            metadata_timeout_ms: 5000,
            capture_stop_timeout_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn capture_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_stop_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub tick_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
        }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on sampled frames per uploaded video
    pub max_frames: u32,
    pub request_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_frames: 30,
            request_timeout_ms: 60_000,
        }
    }
}

impl BatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl StudioConfig {
    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_url.trim().is_empty() {
            return Err(ConfigError::Validation("stream_url is empty".to_string()));
        }
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Validation("api_url is empty".to_string()));
        }
        if !(1..=100).contains(&self.encoder.quality) {
            return Err(ConfigError::Validation(format!(
                "encoder.quality must be within 1..=100, got {}",
                self.encoder.quality
            )));
        }

        let capture = &self.capture;
        for (name, value) in [
            ("capture.base_interval_ms", capture.base_interval_ms),
            ("capture.not_ready_delay_ms", capture.not_ready_delay_ms),
            ("capture.encode_backoff_ms", capture.encode_backoff_ms),
            ("playback.tick_interval_ms", self.playback.tick_interval_ms),
            ("channel.connect_timeout_ms", self.channel.connect_timeout_ms),
            ("channel.close_timeout_ms", self.channel.close_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be > 0", name)));
            }
        }
        if capture.encode_backoff_max_ms < capture.encode_backoff_ms {
            return Err(ConfigError::Validation(format!(
                "capture.encode_backoff_max_ms ({}) is below capture.encode_backoff_ms ({})",
                capture.encode_backoff_max_ms, capture.encode_backoff_ms
            )));
        }
        if self.batch.max_frames == 0 {
            return Err(ConfigError::Validation(
                "batch.max_frames must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a YAML file.
///
/// # Example
///
/// ```rust,ignore
/// let config: StudioConfig = load_config("terrasight.yaml")?;
/// ```
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;

    serde_yaml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load configuration from a file, or use default if file doesn't exist.
pub fn load_config_or_default<T: DeserializeOwned + Default>(
    path: impl AsRef<Path>,
) -> Result<T, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        log::info!("Config file not found, using defaults: {}", path.display());
        return Ok(T::default());
    }

    load_config(path)
}

/// Parse configuration from a YAML string.
///
/// Useful for testing or inline configuration.
pub fn parse_config<T: DeserializeOwned>(yaml: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(yaml).map_err(ConfigError::from)
}
