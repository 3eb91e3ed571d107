//! TerraSight detection client.
//!
//! Streams a live camera feed to the detection backend and renders the most
//! recent result, and replays the per-frame results of an analyzed recording.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use terrasight::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     setup_logging();
//!     let config: StudioConfig = load_config_or_default("terrasight.yaml")?;
//!     config.validate()?;
//!
//!     let camera = Arc::new(SyntheticCamera::default());
//!     let controller = LifecycleController::with_defaults(config, camera);
//!     let mut results = controller.sink().subscribe();
//!
//!     controller.start().await?;
//!     while results.changed().await.is_ok() {
//!         if let Some(frame) = results.borrow_and_update().clone() {
//!             log::info!("{} detections", frame.result.detections.len());
//!         }
//!     }
//!     controller.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod camera;
pub mod channel;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod model;
pub mod player;
pub mod protocol;
pub mod scheduler;
pub mod sink;
pub mod transport;

pub use batch::{BatchClient, BatchError, HealthStatus};
pub use camera::{CameraDevice, CameraSource, SyntheticCamera, SyntheticCameraConfig};
pub use channel::{ChannelState, Connection, SendOutcome, StreamChannel, Transport};
pub use config::{load_config, load_config_or_default, parse_config, StudioConfig};
pub use encoder::{EncodeFrame, FrameEncoder};
pub use error::{
    ChannelError, ConfigError, DeviceError, EncodeError, MalformedResultError, PlaybackError,
    SendFailure, SessionError,
};
pub use frame::{EncodedFrame, Frame, FrameMetadata, ImageFormat, PixelFormat};
pub use lifecycle::LifecycleController;
pub use model::{Detection, DetectionModel, DetectionResult, ResultSequence};
pub use player::{Autoplay, SequencePlayer, SharedPlayer};
pub use scheduler::{CaptureExit, CaptureStatsSnapshot};
pub use sink::{PlaybackProgress, RenderedFrame, ResultSink};
pub use transport::WebSocketTransport;

/// Initialize logging with env_logger.
///
/// Respects RUST_LOG. Defaults to "info" level.
pub fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Prelude for embedding the client.
pub mod prelude {
    pub use crate::{
        load_config, load_config_or_default, parse_config, setup_logging, Autoplay, BatchClient,
        CameraSource, ChannelState, DetectionModel, DetectionResult, FrameEncoder,
        LifecycleController, RenderedFrame, ResultSequence, ResultSink, SequencePlayer,
        SessionError, StudioConfig, SyntheticCamera,
    };
    pub use std::sync::Arc;
}
