//! HQAstroCam
//!
//! Camera service for astrophotography with the Raspberry Pi HQ Camera.
//! Exposes a live MJPEG view, manual sensor controls with presets, still
//! capture with optional raw companions, and video recording over a small
//! HTTP API. Without a camera attached it serves a synthetic star field.
//!
//! # Architecture
//!
//! ```text
//! source ──▶ session (coordinator) ──▶ pipeline (files on disk)
//!                 │        ▲
//!                 ▼        │
//!              preview   server (HTTP) ◀── controls (registry, presets)
//! ```
//!
//! The [`SessionCoordinator`] is the only component that touches the
//! camera. Still capture and recording are mutually exclusive; the live
//! view keeps serving the most recent frame while either runs.
//!
//! # Example
//!
//! ```no_run
//! use hqastrocam::{
//!     config::{CameraConfig, SourceSelection, VideoConfig},
//!     controls::{ControlRegistry, PresetTable},
//!     pipeline::CapturePipeline,
//!     session::SessionCoordinator,
//!     source::open_source,
//! };
//!
//! let camera = CameraConfig {
//!     source: SourceSelection::Synthetic,
//!     ..CameraConfig::default()
//! };
//! let registry = ControlRegistry::hq_camera();
//! let presets = PresetTable::load(&registry, &[]).unwrap();
//! let pipeline = CapturePipeline::new("/tmp/captures", VideoConfig::default()).unwrap();
//! let session = SessionCoordinator::new(registry, presets, open_source(&camera).unwrap(), pipeline);
//!
//! session.apply_preset("deep_sky").unwrap();
//! let record = session.capture(true).unwrap();
//! println!("wrote {:?}", record.files);
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod controls;
pub mod metrics;
pub mod pipeline;
pub mod preview;
pub mod server;
pub mod session;
pub mod source;

// Re-export commonly used types at crate root
pub use config::{AppConfig, ConfigError};
pub use controls::{ControlRegistry, ControlValue, ControlValues, PresetTable};
pub use pipeline::{CaptureRecord, CapturePipeline};
pub use preview::{PreviewBroadcaster, PreviewProducer};
pub use session::{SessionCoordinator, SessionError, SessionState};
pub use source::{open_source, Frame, FrameSource, SyntheticSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
