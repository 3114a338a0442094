use thiserror::Error;

use super::state::SessionState;

/// Errors produced by the capture engine, the session state machine and the
/// recognition submitter.
///
/// Engine and state machine errors are returned synchronously to the caller
/// of the triggering operation. `Submission` only ever reaches the host through
/// `VoiceEventSink::on_recognition_error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("device busy: a capture session is already active")]
    DeviceBusy,

    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("not recording")]
    NotRecording,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    #[error("recognition failed: {0}")]
    Submission(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl VoiceError {
    pub(crate) fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }
}
