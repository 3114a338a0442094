use serde::Serialize;

use super::state::SessionState;

/// Outbound notification toward the host.
///
/// Serializes as `{"event": "onStateChanged", "channel": 0, "state": "RECORDING"}`
/// so bridges can forward it as JSON unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum VoiceEvent {
    #[serde(rename = "onStateChanged")]
    StateChanged { channel: u32, state: SessionState },

    #[serde(rename = "onRecognitionResult")]
    RecognitionResult { channel: u32, transcript: String },

    #[serde(rename = "onRecognitionError")]
    RecognitionError { channel: u32, reason: String },

    #[serde(rename = "onVolumeChanged")]
    VolumeChanged { channel: u32, level: f32 },
}

impl VoiceEvent {
    pub fn channel(&self) -> u32 {
        match self {
            Self::StateChanged { channel, .. }
            | Self::RecognitionResult { channel, .. }
            | Self::RecognitionError { channel, .. }
            | Self::VolumeChanged { channel, .. } => *channel,
        }
    }
}
