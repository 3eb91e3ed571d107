//! Raw frame → compact base64 payload.
//!
//! Tuned for latency: frames are downscaled to `max_width` and compressed at a
//! reduced quality so that encode cost stays well below the capture interval.

use async_trait::async_trait;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::config::EncoderConfig;
use crate::error::EncodeError;
use crate::frame::{EncodedFrame, Frame, ImageFormat, PixelFormat};

/// Encoding seam used by the capture loop.
#[async_trait]
pub trait EncodeFrame: Send + Sync + 'static {
    async fn encode(&self, frame: Frame) -> Result<EncodedFrame, EncodeError>;
}

/// CPU encoder backed by the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct FrameEncoder {
    config: EncoderConfig,
}

impl FrameEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode synchronously on the calling thread.
    pub fn encode_blocking(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
        let rgb = to_rgb_image(frame)?;
        let rgb = self.downscale(rgb);
        let (width, height) = rgb.dimensions();

        let mut buffer = Vec::with_capacity(width as usize * height as usize / 4);
        match self.config.format {
            ImageFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut buffer, self.config.quality.clamp(1, 100))
                    .encode_image(&rgb)?;
            }
            ImageFormat::Png => {
                PngEncoder::new(&mut buffer).write_image(
                    rgb.as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )?;
            }
        }

        let byte_len = buffer.len();
        let payload = base64::engine::general_purpose::STANDARD.encode(&buffer);
        log::trace!(
            "[Encoder] frame {} {}x{} -> {} bytes {:?}",
            frame.sequence,
            width,
            height,
            byte_len,
            self.config.format
        );

        Ok(EncodedFrame::new(
            payload,
            self.config.format,
            self.config.quality,
            width,
            height,
            byte_len,
        ))
    }

    fn downscale(&self, rgb: RgbImage) -> RgbImage {
        let max_width = self.config.max_width;
        let (width, height) = rgb.dimensions();
        if max_width == 0 || width <= max_width {
            return rgb;
        }
        let scaled_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
        image::imageops::resize(&rgb, max_width, scaled_height, FilterType::Triangle)
    }
}

#[async_trait]
impl EncodeFrame for FrameEncoder {
    async fn encode(&self, frame: Frame) -> Result<EncodedFrame, EncodeError> {
        // Cheap geometry checks stay on the async side.
        check_geometry(&frame)?;
        let encoder = self.clone();
        tokio::task::spawn_blocking(move || encoder.encode_blocking(&frame))
            .await
            .map_err(|e| EncodeError::Worker(e.to_string()))?
    }
}

fn check_geometry(frame: &Frame) -> Result<(), EncodeError> {
    if frame.data.is_empty() {
        return Err(EncodeError::SourceNotReady);
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(EncodeError::ZeroDimension {
            width: frame.width,
            height: frame.height,
        });
    }
    if frame.data.len() != frame.expected_len() {
        return Err(EncodeError::SurfaceUnavailable(format!(
            "{}x{} {:?} needs {} bytes, buffer has {}",
            frame.width,
            frame.height,
            frame.format,
            frame.expected_len(),
            frame.data.len()
        )));
    }
    Ok(())
}

fn to_rgb_image(frame: &Frame) -> Result<RgbImage, EncodeError> {
    check_geometry(frame)?;

    let rgb = match frame.format {
        PixelFormat::Rgb8 => frame.data.clone(),
        PixelFormat::Rgba8 => frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelFormat::Bgr8 => frame
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
    };

    RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
        EncodeError::SurfaceUnavailable("pixel buffer does not fit frame dimensions".to_string())
    })
}
