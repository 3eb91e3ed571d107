//! Camera device seam.
//!
//! Platform capture backends implement `CameraSource`/`CameraDevice`; the
//! crate ships only a synthetic test-pattern camera.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::DeviceError;
use crate::frame::{Frame, FrameMetadata, PixelFormat};

/// Device handle shared between the capture loop and session teardown.
pub type SharedDevice = Arc<Mutex<Box<dyn CameraDevice>>>;

/// Grants access to a camera.
#[async_trait]
pub trait CameraSource: Send + Sync + 'static {
    /// Acquire the device. Fails on permission denial or missing hardware.
    async fn acquire(&self) -> Result<Box<dyn CameraDevice>, DeviceError>;
}

/// An acquired camera.
#[async_trait]
pub trait CameraDevice: Send + 'static {
    /// Resolve once the device knows its stream dimensions.
    async fn metadata(&mut self) -> Result<FrameMetadata, DeviceError>;

    /// Grab the current frame. `Ok(None)` means no frame is available yet.
    async fn grab_frame(&mut self) -> Result<Option<Frame>, DeviceError>;

    /// Stop all tracks and release the hardware.
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Synthetic camera configuration
#[derive(Debug, Clone)]
pub struct SyntheticCameraConfig {
    pub width: u32,
    pub height: u32,
    /// Delay before the first frame metadata is reported
    pub warmup: Duration,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            warmup: Duration::ZERO,
        }
    }
}

/// Test-pattern camera that is always available.
#[derive(Debug, Clone, Default)]
pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CameraSource for SyntheticCamera {
    async fn acquire(&self) -> Result<Box<dyn CameraDevice>, DeviceError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(DeviceError::Unavailable(format!(
                "synthetic camera configured as {}x{}",
                self.config.width, self.config.height
            )));
        }
        log::info!(
            "[Camera] synthetic {}x{} acquired",
            self.config.width,
            self.config.height
        );
        Ok(Box::new(SyntheticDevice {
            config: self.config.clone(),
            frame_count: 0,
            released: false,
        }))
    }
}

struct SyntheticDevice {
    config: SyntheticCameraConfig,
    frame_count: u64,
    released: bool,
}

impl SyntheticDevice {
    /// Moving diagonal gradient so consecutive frames differ.
    fn generate_pixels(&self) -> Vec<u8> {
        let (width, height) = (self.config.width as u64, self.config.height as u64);
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let shift = self.frame_count * 4;
                pixels.push(((x + shift) % 256) as u8);
                pixels.push(((y + shift) % 256) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }
        pixels
    }
}

#[async_trait]
impl CameraDevice for SyntheticDevice {
    async fn metadata(&mut self) -> Result<FrameMetadata, DeviceError> {
        if !self.config.warmup.is_zero() {
            tokio::time::sleep(self.config.warmup).await;
        }
        Ok(FrameMetadata {
            width: self.config.width,
            height: self.config.height,
        })
    }

    async fn grab_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        if self.released {
            return Err(DeviceError::Capture("device already released".to_string()));
        }
        self.frame_count += 1;
        let frame = Frame::new(
            self.config.width,
            self.config.height,
            PixelFormat::Rgb8,
            self.generate_pixels(),
        )
        .with_sequence(self.frame_count);
        Ok(Some(frame))
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        if !self.released {
            log::info!(
                "[Camera] synthetic device released after {} frames",
                self.frame_count
            );
        }
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_camera_produces_frames() {
        let camera = SyntheticCamera::new(SyntheticCameraConfig {
            width: 8,
            height: 4,
            ..Default::default()
        });
        let mut device = camera.acquire().await.unwrap();
        let meta = device.metadata().await.unwrap();
        assert_eq!((meta.width, meta.height), (8, 4));

        let first = device.grab_frame().await.unwrap().unwrap();
        let second = device.grab_frame().await.unwrap().unwrap();
        assert_eq!(first.data.len(), first.expected_len());
        assert_eq!(second.sequence, 2);
        assert_ne!(first.data, second.data);
    }

    #[tokio::test]
    async fn released_device_stops_capturing() {
        let mut device = SyntheticCamera::default().acquire().await.unwrap();
        device.release().unwrap();
        device.release().unwrap();
        assert!(matches!(
            device.grab_frame().await,
            Err(DeviceError::Capture(_))
        ));
    }

    #[tokio::test]
    async fn zero_sized_camera_is_unavailable() {
        let camera = SyntheticCamera::new(SyntheticCameraConfig {
            width: 0,
            ..Default::default()
        });
        assert!(matches!(
            camera.acquire().await,
            Err(DeviceError::Unavailable(_))
        ));
    }
}
