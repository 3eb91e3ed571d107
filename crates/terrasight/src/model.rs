//! Detection results as produced by the inference backend.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MalformedResultError, PlaybackError};

/// Model keys understood by the backend.
///
/// Unknown keys are kept verbatim so a newer backend model can be selected
/// without a client update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectionModel {
    /// YOLOv13 nano with CLAHE pre-processing, tuned for edge devices
    #[default]
    Yolo13nClahe,
    /// YOLOv26 small, higher accuracy
    Yolo26s,
    Other(String),
}

impl DetectionModel {
    pub fn key(&self) -> &str {
        match self {
            DetectionModel::Yolo13nClahe => "yolo13n_clahe",
            DetectionModel::Yolo26s => "yolo26s",
            DetectionModel::Other(key) => key,
        }
    }
}

impl From<String> for DetectionModel {
    fn from(key: String) -> Self {
        match key.as_str() {
            "yolo13n_clahe" => DetectionModel::Yolo13nClahe,
            "yolo26s" => DetectionModel::Yolo26s,
            _ => DetectionModel::Other(key),
        }
    }
}

impl From<DetectionModel> for String {
    fn from(model: DetectionModel) -> Self {
        model.key().to_string()
    }
}

impl fmt::Display for DetectionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single classified observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Confidence score in [0, 1]
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in source pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
}

/// One processed frame: the annotated image plus what was found in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Renderable image, normally a `data:image/jpeg;base64,...` URL
    pub image: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Source frame index, only present in video analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<u64>,
}

impl DetectionResult {
    /// Parse and validate an inbound JSON payload.
    pub fn from_json(text: &str) -> Result<Self, MalformedResultError> {
        let result: DetectionResult = serde_json::from_str(text)?;
        result.validate()?;
        Ok(result)
    }

    /// Reject results the renderer cannot trust.
    pub fn validate(&self) -> Result<(), MalformedResultError> {
        for (i, det) in self.detections.iter().enumerate() {
            if !det.confidence.is_finite() || !(0.0..=1.0).contains(&det.confidence) {
                return Err(MalformedResultError(format!(
                    "detection {} ({}) has confidence {} outside [0, 1]",
                    i, det.label, det.confidence
                )));
            }
        }
        Ok(())
    }

    /// Decode the annotated image into its encoded bytes (e.g. JPEG).
    ///
    /// Accepts both data URLs and bare base64.
    pub fn image_bytes(&self) -> Result<Vec<u8>, MalformedResultError> {
        let encoded = match self.image.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => self.image.as_str(),
        };
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| MalformedResultError(format!("image is not valid base64: {}", e)))
    }

    /// Highest-confidence detection, if any
    pub fn top_detection(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Precomputed per-frame results of one recorded-video analysis.
///
/// Never empty, so any cursor in `0..len()` is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSequence {
    frames: Vec<DetectionResult>,
    total_source_frame_count: u64,
}

impl ResultSequence {
    pub fn new(
        frames: Vec<DetectionResult>,
        total_source_frame_count: u64,
    ) -> Result<Self, PlaybackError> {
        if frames.is_empty() {
            return Err(PlaybackError::EmptySequence);
        }
        Ok(Self {
            frames,
            total_source_frame_count,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; kept for API symmetry with `len()`
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DetectionResult> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[DetectionResult] {
        &self.frames
    }

    pub fn total_source_frame_count(&self) -> u64 {
        self.total_source_frame_count
    }

    pub fn processed_frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backend_result() {
        let json = r#"{
            "model": "yolo13n_clahe",
            "detections": [
                {"label": "plastic", "confidence": 0.91, "bbox": [10.0, 20.0, 110.0, 220.0]},
                {"label": "paper", "confidence": 0.42}
            ],
            "image": "data:image/jpeg;base64,/9j/AA=="
        }"#;
        let result = DetectionResult::from_json(json).unwrap();
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.detections[0].bbox, Some([10.0, 20.0, 110.0, 220.0]));
        assert_eq!(result.detections[1].bbox, None);
        assert_eq!(result.model.as_deref(), Some("yolo13n_clahe"));
        assert_eq!(result.top_detection().unwrap().label, "plastic");
    }

    #[test]
    fn reject_confidence_out_of_range() {
        let json = r#"{"detections": [{"label": "can", "confidence": 1.5}], "image": ""}"#;
        let err = DetectionResult::from_json(json).unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));
    }

    #[test]
    fn reject_missing_image() {
        let json = r#"{"detections": []}"#;
        assert!(DetectionResult::from_json(json).is_err());
    }

    #[test]
    fn reject_non_json() {
        assert!(DetectionResult::from_json("not json").is_err());
    }

    #[test]
    fn image_bytes_from_data_url_and_bare_base64() {
        let mut result = DetectionResult {
            image: "data:image/jpeg;base64,AQID".to_string(),
            detections: vec![],
            model: None,
            frame_number: None,
        };
        assert_eq!(result.image_bytes().unwrap(), vec![1, 2, 3]);

        result.image = "AQID".to_string();
        assert_eq!(result.image_bytes().unwrap(), vec![1, 2, 3]);

        result.image = "data:image/jpeg;base64,@@@".to_string();
        assert!(result.image_bytes().is_err());
    }

    #[test]
    fn model_keys_round_trip_through_serde() {
        let model: DetectionModel = serde_json::from_str("\"yolo26s\"").unwrap();
        assert_eq!(model, DetectionModel::Yolo26s);
        assert_eq!(serde_json::to_string(&model).unwrap(), "\"yolo26s\"");

        let custom: DetectionModel = serde_json::from_str("\"custom_v2\"").unwrap();
        assert_eq!(custom.key(), "custom_v2");
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(matches!(
            ResultSequence::new(vec![], 120),
            Err(PlaybackError::EmptySequence)
        ));
    }
}
