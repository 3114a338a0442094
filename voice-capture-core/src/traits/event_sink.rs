use std::sync::mpsc::Sender;

use crate::models::error::VoiceError;
use crate::models::event::VoiceEvent;
use crate::models::state::SessionState;

/// Host-facing event sink.
///
/// State and recognition events arrive in transition order, from whichever
/// thread performed the transition (control thread or recognition worker).
/// Volume events arrive on the capture thread and must return quickly.
/// Implementations may query `VoiceSession::state()` and may call control
/// operations on the session from inside a callback. Events raised by such a
/// nested call are delivered after the current callback returns. A host that
/// guards the session with its own lock must not hold that lock while
/// waiting on the sink.
pub trait VoiceEventSink: Send + Sync {
    /// Called after every state transition with the new state.
    fn on_state_changed(&self, channel: u32, state: SessionState);

    /// Called once when a recognition phase completes with a transcript.
    fn on_recognition_result(&self, channel: u32, transcript: &str);

    /// Called once when a recognition phase fails.
    fn on_recognition_error(&self, channel: u32, error: &VoiceError);

    /// Called for every filled capture buffer with its RMS level (0.0–1.0).
    fn on_volume_changed(&self, _channel: u32, _level: f32) {}
}

/// Forwards events into a channel. Send failures (receiver gone) are ignored.
impl VoiceEventSink for Sender<VoiceEvent> {
    fn on_state_changed(&self, channel: u32, state: SessionState) {
        let _ = self.send(VoiceEvent::StateChanged { channel, state });
    }

    fn on_recognition_result(&self, channel: u32, transcript: &str) {
        let _ = self.send(VoiceEvent::RecognitionResult {
            channel,
            transcript: transcript.to_string(),
        });
    }

    fn on_recognition_error(&self, channel: u32, error: &VoiceError) {
        let reason = match error {
            VoiceError::Submission(reason) => reason.clone(),
            other => other.to_string(),
        };
        let _ = self.send(VoiceEvent::RecognitionError { channel, reason });
    }

    fn on_volume_changed(&self, channel: u32, level: f32) {
        let _ = self.send(VoiceEvent::VolumeChanged { channel, level });
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl VoiceEventSink for NullEventSink {
    fn on_state_changed(&self, _channel: u32, _state: SessionState) {}
    fn on_recognition_result(&self, _channel: u32, _transcript: &str) {}
    fn on_recognition_error(&self, _channel: u32, _error: &VoiceError) {}
}
