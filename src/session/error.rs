use crate::controls::ControlError;
use crate::pipeline::PipelineError;
use crate::source::SourceError;
use thiserror::Error;

/// Errors reported by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    OutOfRange(String),
    #[error("camera busy: {0}")]
    Busy(&'static str),
    #[error("no recording in progress")]
    NotRecording,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("storage error: {0}")]
    Storage(#[from] PipelineError),
}

impl SessionError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidParameter(_) => "invalid_parameter",
            SessionError::OutOfRange(_) => "out_of_range",
            SessionError::Busy(_) => "busy",
            SessionError::NotRecording => "not_recording",
            SessionError::DeviceUnavailable(_) => "device_unavailable",
            SessionError::Storage(_) => "storage_error",
        }
    }
}

impl From<ControlError> for SessionError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::InvalidParameter(_) => SessionError::InvalidParameter(e.to_string()),
            ControlError::OutOfRange { .. } => SessionError::OutOfRange(e.to_string()),
        }
    }
}

impl From<SourceError> for SessionError {
    fn from(e: SourceError) -> Self {
        SessionError::DeviceUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_errors_keep_their_kind() {
        let unknown: SessionError = ControlError::InvalidParameter("Foo".into()).into();
        assert_eq!(unknown.kind(), "invalid_parameter");

        let range: SessionError = ControlError::OutOfRange {
            id: "AnalogueGain".into(),
            reason: "must be between 1 and 22".into(),
        }
        .into();
        assert_eq!(range.kind(), "out_of_range");
        assert!(range.to_string().contains("AnalogueGain"));
    }

    #[test]
    fn test_source_errors_map_to_device_unavailable() {
        let err: SessionError = SourceError::DeviceUnavailable("gone".into()).into();
        assert_eq!(err.kind(), "device_unavailable");
    }
}
