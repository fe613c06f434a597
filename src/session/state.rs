use crate::controls::ControlValues;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which exclusive activity the camera is engaged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Capturing,
    Recording,
}

/// The authoritative camera state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    /// Current value of every registered control.
    pub values: ControlValues,
    /// Preset last applied, cleared by any manual change.
    pub active_preset: Option<String>,
    pub recording: bool,
    pub recording_path: Option<PathBuf>,
}

impl SessionState {
    pub fn new(values: ControlValues) -> Self {
        Self {
            values,
            active_preset: None,
            recording: false,
            recording_path: None,
        }
    }
}

/// An active video recording.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSession {
    pub path: PathBuf,
    pub fps: u32,
    pub started_at: DateTime<Local>,
}

/// Progress of the active recording.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStatus {
    #[serde(flatten)]
    pub session: RecordingSession,
    pub frames: u64,
    pub elapsed_secs: f64,
}

/// A recording that ended on its own because the camera or disk failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterruptedRecording {
    /// The finalized video, if anything could be saved.
    pub path: Option<PathBuf>,
    pub frames: u64,
    pub reason: String,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub state: SessionState,
    pub recording: Option<RecordingStatus>,
    /// Set until the next `stop_recording` or `start_recording` call.
    pub interrupted: Option<InterruptedRecording>,
}

/// Outcome of a finished recording.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub fps: u32,
    pub frames: u64,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
}

/// Running totals exported as metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub captures: u64,
    pub capture_failures: u64,
    pub recordings: u64,
    pub recorded_frames: u64,
    pub settings_changes: u64,
    pub preview_frames: u64,
    pub recording_active: bool,
}
