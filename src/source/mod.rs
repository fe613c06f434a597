//! Frame acquisition.
//!
//! This module provides a trait-based abstraction over the camera, allowing
//! the session coordinator to drive either the Raspberry Pi HQ Camera or a
//! synthetic star field through the same interface. The variant is chosen
//! once by [`open_source`] and never changes afterwards.

mod frame;
mod hardware;
mod synthetic;

pub use frame::{Frame, FrameFormat};
pub use hardware::{probe_hardware, CameraCommand, JpegSplitter, RpiCamera};
pub use synthetic::SyntheticSource;

use crate::config::{CameraConfig, Resolution, SourceSelection};
use crate::controls::ControlValues;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during frame acquisition.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("no camera detected: {0}")]
    NotDetected(String),
}

/// What kind of frame the caller wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRequest {
    /// Low-latency JPEG for the live view.
    Preview,
    /// Full-resolution JPEG still. `with_raw` announces that a `Raw`
    /// request for the same exposure follows.
    Still { with_raw: bool },
    /// Unprocessed sensor data matching the preceding still.
    Raw,
    /// JPEG frame from the continuous video stream.
    Video { fps: u32 },
}

/// Which implementation backs a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Hardware,
    Synthetic,
}

/// Static description of a frame source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCapabilities {
    pub name: String,
    pub kind: SourceKind,
    pub preview_size: Resolution,
    pub still_size: Resolution,
    pub video_size: Resolution,
    /// Whether controls can change without restarting the sensor pipeline.
    pub live_controls: bool,
}

/// A producer of preview, still and video frames.
///
/// Implementations are driven from one thread at a time; the session
/// coordinator serializes all access.
pub trait FrameSource: Send {
    /// Describes the source.
    fn capabilities(&self) -> &SourceCapabilities;

    /// Applies a complete set of control values.
    fn configure(&mut self, values: &ControlValues) -> Result<(), SourceError>;

    /// Blocks until the requested frame is available.
    fn next_frame(&mut self, request: FrameRequest) -> Result<Frame, SourceError>;

    /// Releases the device.
    fn close(&mut self) {}
}

/// Opens the frame source selected by the configuration.
///
/// `auto` probes for the HQ Camera and falls back to the synthetic star
/// field when none is found.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    match config.source {
        SourceSelection::Synthetic => Ok(Box::new(SyntheticSource::new(config))),
        SourceSelection::Hardware => {
            let model = probe_hardware(&config.command)?;
            Ok(Box::new(RpiCamera::new(config, model)))
        }
        SourceSelection::Auto => match probe_hardware(&config.command) {
            Ok(model) => Ok(Box::new(RpiCamera::new(config, model))),
            Err(e) => {
                tracing::warn!(error = %e, "No camera detected, running in demo mode");
                Ok(Box::new(SyntheticSource::new(config)))
            }
        },
    }
}
