//! Prometheus metrics for the camera service.
//!
//! Exposed at `/metrics` on the main HTTP server.
//!
//! # Metrics Exposed
//!
//! ## Captures
//! - `hqastrocam_captures_total` - Still captures written
//! - `hqastrocam_capture_failures_total` - Still captures that failed
//!
//! ## Recording
//! - `hqastrocam_recordings_total` - Video recordings finalized
//! - `hqastrocam_recording_active` - 1 while a recording is in progress
//! - `hqastrocam_recorded_frames_total` - Video frames written
//!
//! ## Live View
//! - `hqastrocam_preview_frames_total` - Fresh frames acquired
//! - `hqastrocam_preview_published_total` - Frames published to viewers
//! - `hqastrocam_preview_viewers` - Connected viewers
//!
//! ## Other
//! - `hqastrocam_settings_changes_total` - Accepted settings changes
//! - `hqastrocam_cpu_temperature_celsius` - SoC temperature

mod collector;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
