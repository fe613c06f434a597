//! Session coordination.
//!
//! The [`SessionCoordinator`] owns the frame source and the authoritative
//! camera state. It serializes access to the sensor so that a still
//! capture, a video recording and the live preview never contend for it,
//! and it keeps control values consistent across all three.

mod cache;
mod coordinator;
mod error;
mod persist;
mod recorder;
mod state;

pub use cache::PreviewFrame;
pub use coordinator::{SessionCoordinator, MAX_RECORDING_FPS, MIN_RECORDING_FPS};
pub use error::SessionError;
pub use persist::{RestoredState, StateStore};
pub use state::{
    InterruptedRecording, Phase, RecordingSession, RecordingStatus, RecordingSummary,
    SessionSnapshot, SessionState, SessionStats,
};
