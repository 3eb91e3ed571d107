//! HTTP client for the batch analysis endpoints.
//!
//! Single request/response uploads: one still image, or one recorded video
//! that the backend samples down to at most `max_frames` processed frames.

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::config::BatchConfig;
use crate::error::MalformedResultError;
use crate::model::{DetectionModel, DetectionResult, ResultSequence};

// ── Errors ──────────────────────────────────────────────────────────

/// Errors from batch analysis requests.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The video produced no processed frames
    #[error("Video analysis returned no frames")]
    EmptySequence,
}

impl From<MalformedResultError> for BatchError {
    fn from(err: MalformedResultError) -> Self {
        BatchError::Malformed(err.0)
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::Malformed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    total_frames: u64,
    #[serde(default)]
    frames: Vec<DetectionResult>,
}

/// Parse a `/detect` response body.
pub fn parse_image_response(body: &str) -> Result<DetectionResult> {
    Ok(DetectionResult::from_json(body)?)
}

/// Parse a `/detect-video` response body into a playable sequence.
pub fn parse_video_response(body: &str) -> Result<ResultSequence> {
    let response: VideoResponse = serde_json::from_str(body)?;
    for frame in &response.frames {
        frame.validate()?;
    }
    ResultSequence::new(response.frames, response.total_frames)
        .map_err(|_| BatchError::EmptySequence)
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BatchClient {
    client: reqwest::Client,
    base_url: String,
    max_frames: u32,
}

impl BatchClient {
    pub fn new(base_url: impl Into<String>, config: &BatchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_frames: config.max_frames,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.client.get(self.url("/health")).send().await?;
        let body = Self::body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Run detection on a single image.
    pub async fn detect_image(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        model: &DetectionModel,
    ) -> Result<DetectionResult> {
        log::info!(
            "[Batch] detect {} ({} bytes, model={})",
            file_name,
            bytes.len(),
            model
        );
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("model", model.key().to_string());
        let response = self
            .client
            .post(self.url("/detect"))
            .multipart(form)
            .send()
            .await?;
        let result = parse_image_response(&Self::body(response).await?)?;
        log::debug!("[Batch] {} detections", result.detections.len());
        Ok(result)
    }

    /// Run detection over sampled frames of a recorded video.
    pub async fn detect_video(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        model: &DetectionModel,
    ) -> Result<ResultSequence> {
        log::info!(
            "[Batch] detect-video {} ({} bytes, model={}, max_frames={})",
            file_name,
            bytes.len(),
            model,
            self.max_frames
        );
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("model", model.key().to_string())
            .text("max_frames", self.max_frames.to_string());
        let response = self
            .client
            .post(self.url("/detect-video"))
            .multipart(form)
            .send()
            .await?;
        let sequence = parse_video_response(&Self::body(response).await?)?;
        log::info!(
            "[Batch] {} of {} frames processed",
            sequence.processed_frame_count(),
            sequence.total_source_frame_count()
        );
        Ok(sequence)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(BatchError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.text().await?)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
