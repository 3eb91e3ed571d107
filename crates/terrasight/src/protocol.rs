//! Wire messages of the live detection stream.
//!
//! Every message is an independent JSON text frame. Outbound messages are
//! tagged by `type`; inbound results carry no tag and no frame identifier.

use serde::Serialize;

use crate::error::ChannelError;
use crate::frame::EncodedFrame;

/// Client → server messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage<'a> {
    /// Session parameters, sent once right after connect
    Config { model: &'a str },
    /// One base64-encoded camera frame
    Frame { data: &'a str },
}

impl<'a> OutboundMessage<'a> {
    pub fn config(model: &'a str) -> Self {
        OutboundMessage::Config { model }
    }

    pub fn frame(encoded: &'a EncodedFrame) -> Self {
        OutboundMessage::Frame {
            data: encoded.payload(),
        }
    }

    pub fn to_text(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageFormat;
    use serde_json::Value;

    #[test]
    fn config_message_shape() {
        let text = OutboundMessage::config("yolo26s").to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"type": "config", "model": "yolo26s"}));
    }

    #[test]
    fn frame_message_shape() {
        let encoded = EncodedFrame::new("AQID".to_string(), ImageFormat::Jpeg, 60, 2, 2, 3);
        let text = OutboundMessage::frame(&encoded).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"type": "frame", "data": "AQID"}));
    }
}
