//! # voice-capture-windows
//!
//! Windows WASAPI microphone backend for voice-capture-core.
//!
//! Provides:
//! - `WasapiMicInput`: `AudioInput` over a WASAPI capture endpoint
//! - `DeviceEnumerator`: Microphone enumeration via MMDevice API
//! - `permissions`: Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1803+ for the microphone privacy setting
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use voice_capture_core::{EngineConfig, NullEventSink, RecordingOptions, VoiceSession};
//! use voice_capture_windows::WasapiMicInput;
//!
//! let mut session = VoiceSession::new(
//!     WasapiMicInput::default_device(),
//!     Arc::new(my_backend),
//!     Arc::new(NullEventSink),
//!     EngineConfig::default(),
//! )?;
//! session.start_recording(RecordingOptions::with_api_key("..."))?;
//! ```

#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_mic;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use permissions::MicrophoneAccess;
#[cfg(target_os = "windows")]
pub use wasapi_mic::WasapiMicInput;
