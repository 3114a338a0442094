//! # voice-capture-core
//!
//! Platform-agnostic voice capture core library.
//!
//! Captures microphone PCM into a fixed pool of rotating buffers, accumulates
//! one recording at a time in memory, and drives the
//! NONE → RECORDING → RECOGNIZING → NONE state machine around an external
//! speech recognition backend. Platform backends (Windows WASAPI) implement
//! the `AudioInput` trait and plug into the generic `VoiceSession`.
//!
//! ## Architecture
//!
//! ```text
//! voice-capture-core (this crate)
//! ├── traits/       ← AudioInput, RecognitionBackend, VoiceEventSink
//! ├── models/       ← VoiceError, SessionState, EngineConfig, RecordingOptions, VoiceEvent, etc.
//! ├── processing/   ← AudioBufferPool, PCM conversion and metering, WAV header generation
//! ├── session/      ← CaptureEngine, RecognitionSubmitter, VoiceSession (state machine)
//! └── storage/      ← WAV file output, checksums
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioFormat, AudioSource, AudioTransportType, PoolStats};
pub use models::config::{EngineConfig, RecordingOptions};
pub use models::error::VoiceError;
pub use models::event::VoiceEvent;
pub use models::recording_result::{RecognitionRequest, RecordingResult};
pub use models::state::SessionState;
pub use processing::buffer_pool::{AudioBuffer, AudioBufferPool};
pub use processing::pcm::{LinearResampler, PcmConverter};
pub use session::engine::{CaptureEngine, CaptureObserver, CaptureSessionInfo, CapturedAudio, FaultCallback, LevelCallback};
pub use session::submitter::{RecognitionSubmitter, SubmissionHandle};
pub use session::voice_session::{SessionStateHandle, VoiceSession};
pub use storage::wav_writer::WavFileWriter;
pub use traits::audio_input::{AudioInput, PcmCallback, StreamErrorCallback};
pub use traits::event_sink::{NullEventSink, VoiceEventSink};
pub use traits::recognition_backend::{CancelToken, RecognitionBackend};
