//! Microphone access check behind `WasapiMicInput::is_available()`.
//!
//! Windows gates desktop microphone capture with the global toggle under
//! Settings > Privacy > Microphone. There is no consent prompt for unpackaged
//! apps, so the only way to learn the answer is to activate an audio client
//! on the capture endpoint and look at the HRESULT.

use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use voice_capture_core::models::error::VoiceError;

const E_ACCESSDENIED: i32 = -2147024891;
const AUDCLNT_E_DEVICE_IN_USE: i32 = -2004287478;

/// Outcome of checking the default capture endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneAccess {
    Granted,
    /// The privacy toggle blocks desktop apps.
    Denied,
    /// Another process holds the endpoint in exclusive mode.
    InUse,
    /// No active capture endpoint.
    NoDevice,
}

impl MicrophoneAccess {
    /// Whether a recording can be started right now.
    pub fn is_usable(self) -> bool {
        self == MicrophoneAccess::Granted
    }

    /// The `DeviceUnavailable` reason for an unusable endpoint.
    pub fn unavailable_reason(self) -> Option<&'static str> {
        match self {
            MicrophoneAccess::Granted => None,
            MicrophoneAccess::Denied => Some("microphone access is off in privacy settings"),
            MicrophoneAccess::InUse => Some("microphone is held exclusively by another application"),
            MicrophoneAccess::NoDevice => Some("no microphone connected"),
        }
    }
}

/// Check the default capture endpoint. Initializes COM on the calling thread
/// for the duration of the call.
pub fn microphone_access() -> Result<MicrophoneAccess, VoiceError> {
    unsafe {
        CoInitializeEx(None, COINIT_MULTITHREADED)
            .ok()
            .map_err(|e| VoiceError::DeviceUnavailable(format!("CoInitializeEx failed: {}", e)))?;
        let access = check_default_endpoint();
        CoUninitialize();
        access
    }
}

unsafe fn check_default_endpoint() -> Result<MicrophoneAccess, VoiceError> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to create enumerator: {}", e)))?;

    let Ok(device) = enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) else {
        return Ok(MicrophoneAccess::NoDevice);
    };

    let activated: windows::core::Result<IAudioClient> = device.Activate(CLSCTX_ALL, None);
    Ok(match activated {
        Ok(_) => MicrophoneAccess::Granted,
        Err(e) if e.code().0 == E_ACCESSDENIED => MicrophoneAccess::Denied,
        Err(e) if e.code().0 == AUDCLNT_E_DEVICE_IN_USE => MicrophoneAccess::InUse,
        Err(e) => {
            // let `open` surface the real failure
            log::warn!("unexpected HRESULT checking microphone access: {}", e);
            MicrophoneAccess::Granted
        }
    })
}
