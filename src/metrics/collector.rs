//! Metrics collection and registry.

use crate::preview::PreviewBroadcaster;
use crate::session::SessionStats;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Point-in-time values to export.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub captures: u64,
    pub capture_failures: u64,
    pub recordings: u64,
    pub recording_active: bool,
    pub recorded_frames: u64,
    pub settings_changes: u64,
    /// Fresh frames pulled from the source for the live view.
    pub preview_frames: u64,
    /// Frames handed to the broadcaster.
    pub preview_published: u64,
    pub preview_viewers: usize,
    pub cpu_temperature: Option<f64>,
}

impl MetricsSnapshot {
    /// Gathers the current values from the running components.
    pub fn from_components(
        stats: &SessionStats,
        preview: &PreviewBroadcaster,
        cpu_temperature: Option<f64>,
    ) -> Self {
        Self {
            captures: stats.captures,
            capture_failures: stats.capture_failures,
            recordings: stats.recordings,
            recording_active: stats.recording_active,
            recorded_frames: stats.recorded_frames,
            settings_changes: stats.settings_changes,
            preview_frames: stats.preview_frames,
            preview_published: preview.published(),
            preview_viewers: preview.subscriber_count(),
            cpu_temperature,
        }
    }
}

/// Prometheus registry for the camera service.
pub struct MetricsRegistry {
    registry: Registry,

    captures_total: IntCounter,
    capture_failures_total: IntCounter,

    recordings_total: IntCounter,
    recording_active: IntGauge,
    recorded_frames_total: IntCounter,

    settings_changes_total: IntCounter,

    preview_frames_total: IntCounter,
    preview_published_total: IntCounter,
    preview_viewers: IntGauge,

    cpu_temperature: Gauge,
}

impl MetricsRegistry {
    /// Creates the registry with every metric registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let captures_total =
            IntCounter::new("hqastrocam_captures_total", "Still captures written")?;
        let capture_failures_total = IntCounter::new(
            "hqastrocam_capture_failures_total",
            "Still captures that failed",
        )?;

        let recordings_total = IntCounter::new(
            "hqastrocam_recordings_total",
            "Video recordings finalized",
        )?;
        let recording_active = IntGauge::new(
            "hqastrocam_recording_active",
            "Whether a recording is in progress (1=recording)",
        )?;
        let recorded_frames_total = IntCounter::new(
            "hqastrocam_recorded_frames_total",
            "Video frames written across all recordings",
        )?;

        let settings_changes_total = IntCounter::new(
            "hqastrocam_settings_changes_total",
            "Accepted settings and preset changes",
        )?;

        let preview_frames_total = IntCounter::new(
            "hqastrocam_preview_frames_total",
            "Fresh frames acquired for the live view",
        )?;
        let preview_published_total = IntCounter::new(
            "hqastrocam_preview_published_total",
            "Frames published to live view subscribers",
        )?;
        let preview_viewers = IntGauge::new(
            "hqastrocam_preview_viewers",
            "Connected live view clients",
        )?;

        let cpu_temperature = Gauge::new(
            "hqastrocam_cpu_temperature_celsius",
            "SoC temperature in degrees Celsius",
        )?;

        registry.register(Box::new(captures_total.clone()))?;
        registry.register(Box::new(capture_failures_total.clone()))?;
        registry.register(Box::new(recordings_total.clone()))?;
        registry.register(Box::new(recording_active.clone()))?;
        registry.register(Box::new(recorded_frames_total.clone()))?;
        registry.register(Box::new(settings_changes_total.clone()))?;
        registry.register(Box::new(preview_frames_total.clone()))?;
        registry.register(Box::new(preview_published_total.clone()))?;
        registry.register(Box::new(preview_viewers.clone()))?;
        registry.register(Box::new(cpu_temperature.clone()))?;

        Ok(Self {
            registry,
            captures_total,
            capture_failures_total,
            recordings_total,
            recording_active,
            recorded_frames_total,
            settings_changes_total,
            preview_frames_total,
            preview_published_total,
            preview_viewers,
            cpu_temperature,
        })
    }

    /// Updates every metric from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        advance(&self.captures_total, snapshot.captures);
        advance(&self.capture_failures_total, snapshot.capture_failures);

        advance(&self.recordings_total, snapshot.recordings);
        self.recording_active
            .set(if snapshot.recording_active { 1 } else { 0 });
        advance(&self.recorded_frames_total, snapshot.recorded_frames);

        advance(&self.settings_changes_total, snapshot.settings_changes);

        advance(&self.preview_frames_total, snapshot.preview_frames);
        advance(&self.preview_published_total, snapshot.preview_published);
        self.preview_viewers.set(snapshot.preview_viewers as i64);

        if let Some(celsius) = snapshot.cpu_temperature {
            self.cpu_temperature.set(celsius);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Counters only move forward, by the difference to the running total.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();
        let snapshot = MetricsSnapshot {
            captures: 3,
            capture_failures: 1,
            recordings: 2,
            recording_active: true,
            recorded_frames: 250,
            settings_changes: 4,
            preview_frames: 100,
            preview_published: 90,
            preview_viewers: 2,
            cpu_temperature: Some(48.5),
        };
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("hqastrocam_captures_total 3"));
        assert!(output.contains("hqastrocam_recording_active 1"));
        assert!(output.contains("hqastrocam_recorded_frames_total 250"));
        assert!(output.contains("hqastrocam_preview_viewers 2"));
        assert!(output.contains("hqastrocam_cpu_temperature_celsius 48.5"));
    }

    #[test]
    fn test_counters_never_decrease() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&MetricsSnapshot {
            captures: 5,
            ..MetricsSnapshot::default()
        });
        registry.update(&MetricsSnapshot {
            captures: 2,
            ..MetricsSnapshot::default()
        });
        assert!(registry.encode().unwrap().contains("hqastrocam_captures_total 5"));
    }

    #[test]
    fn test_from_components() {
        let preview = PreviewBroadcaster::new(4);
        let _viewer = preview.subscribe();
        let stats = SessionStats {
            captures: 7,
            recording_active: true,
            ..SessionStats::default()
        };

        let snapshot = MetricsSnapshot::from_components(&stats, &preview, None);
        assert_eq!(snapshot.captures, 7);
        assert!(snapshot.recording_active);
        assert_eq!(snapshot.preview_viewers, 1);
        assert!(snapshot.cpu_temperature.is_none());
    }
}
