use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::AudioFormat;

/// Everything handed to the recognition backend for one recording.
///
/// Opaque to the core: the key, parameters and form data are forwarded as
/// given in `RecordingOptions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRequest {
    /// Generation stamp of the session that produced the payload.
    pub generation: u64,
    /// Complete WAV image (header + PCM).
    pub payload: Vec<u8>,
    pub format: AudioFormat,
    pub api_key: String,
    pub params: HashMap<String, String>,
    pub form_data: HashMap<String, String>,
}

/// Summary returned by `VoiceSession::stop_recording`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingResult {
    pub id: String,
    pub generation: u64,
    pub channel: u32,
    pub format: AudioFormat,
    /// Set when the caller asked for an output file.
    pub file_path: Option<PathBuf>,
    /// PCM bytes captured, excluding the WAV header.
    pub pcm_bytes: u64,
    pub packets: u64,
    pub buffers_filled: u64,
    pub duration_secs: f64,
    /// SHA-256 of the WAV image submitted for recognition.
    pub checksum: String,
    pub created_at: String,
}

impl RecordingResult {
    pub fn new(
        generation: u64,
        channel: u32,
        format: AudioFormat,
        file_path: Option<PathBuf>,
        pcm_bytes: u64,
        buffers_filled: u64,
        checksum: String,
    ) -> Self {
        let packets = match format.bytes_per_packet() {
            0 => 0,
            per_packet => pcm_bytes / per_packet as u64,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            generation,
            channel,
            format,
            file_path,
            pcm_bytes,
            packets,
            buffers_filled,
            duration_secs: format.duration_secs(pcm_bytes),
            checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
