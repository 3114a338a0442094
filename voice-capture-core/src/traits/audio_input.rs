use std::sync::Arc;

use crate::models::audio_models::{AudioFormat, AudioSource};
use crate::models::error::VoiceError;

/// Callback invoked by the hardware with captured PCM bytes laid out in the
/// `AudioFormat` the input was opened with.
///
/// Runs on the device's real-time thread. Chunk sizes are arbitrary and need
/// not align to the engine's buffer size.
pub type PcmCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Callback through which an open stream reports that it died (device
/// unplugged, driver error). Fires at most once per `open`, on the device
/// thread, and never after `close` returns.
pub type StreamErrorCallback = Arc<dyn Fn(VoiceError) + Send + Sync + 'static>;

/// Hardware audio input stream owned by the capture engine.
///
/// Implemented by:
/// - `WasapiMicInput` (Windows)
pub trait AudioInput: Send + Sync {
    /// Whether a capture device is present and accessible.
    fn is_available(&self) -> bool;

    /// Open the device in `format` and start delivering PCM through `callback`.
    ///
    /// Fails with `VoiceError::DeviceUnavailable` if the device cannot be
    /// opened with the requested format. Failures after a successful open go
    /// to `on_error`.
    fn open(
        &mut self,
        format: AudioFormat,
        callback: PcmCallback,
        on_error: StreamErrorCallback,
    ) -> Result<(), VoiceError>;

    /// Stop the stream and release the device. No callback fires once this
    /// returns. Closing a closed input is a no-op.
    fn close(&mut self) -> Result<(), VoiceError>;

    /// Information about the device backing this input.
    fn device_info(&self) -> AudioSource;
}
