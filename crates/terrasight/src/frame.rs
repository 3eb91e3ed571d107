//! Raw camera frames and their encoded form.

use serde::{Deserialize, Serialize};

/// Pixel layout of a raw camera buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Stream dimensions negotiated by a camera device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
}

impl FrameMetadata {
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// A single raw frame grabbed from the camera. Consumed by the encoder.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Monotonic sequence number assigned by the device
    pub sequence: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Byte length the buffer must have for the declared geometry
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            width: self.width,
            height: self.height,
        }
    }
}

/// Transport image format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// Base64 payload of one encoded frame plus the parameters that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    payload: String,
    format: ImageFormat,
    quality: u8,
    width: u32,
    height: u32,
    byte_len: usize,
}

impl EncodedFrame {
    pub fn new(
        payload: String,
        format: ImageFormat,
        quality: u8,
        width: u32,
        height: u32,
        byte_len: usize,
    ) -> Self {
        Self {
            payload,
            format,
            quality,
            width,
            height,
            byte_len,
        }
    }

    /// Standard base64, no data-URL prefix
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of the compressed image before base64
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}
