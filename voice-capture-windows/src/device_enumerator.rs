//! Windows capture device enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list microphone endpoints with friendly
//! names and transport types.

use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Foundation::PROPERTYKEY;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::UI::Shell::PropertiesSystem::IPropertyStore;

use voice_capture_core::models::audio_models::{AudioSource, AudioTransportType};
use voice_capture_core::models::error::VoiceError;

/// Capture device enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, VoiceError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| VoiceError::DeviceUnavailable(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// List active capture (microphone) devices.
    pub fn list_capture_devices(&self) -> Result<Vec<AudioSource>, VoiceError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| VoiceError::DeviceUnavailable(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| VoiceError::DeviceUnavailable(format!("GetCount failed: {}", e)))?;

            let default_id = self.default_capture_device_id().ok();

            let mut devices = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };

                let store = device.OpenPropertyStore(STGM_READ).ok();
                let name = store
                    .as_ref()
                    .and_then(|s| read_string_property(s, &PKEY_Device_FriendlyName))
                    .unwrap_or_else(|| format!("Microphone {}", i));
                let transport = store
                    .as_ref()
                    .map(detect_transport_type)
                    .unwrap_or(AudioTransportType::Unknown);

                devices.push(AudioSource {
                    is_default: default_id.as_deref() == Some(id.as_str()),
                    id,
                    name,
                    transport_type: Some(transport),
                });
            }

            Ok(devices)
        }
    }

    pub fn default_capture_device_id(&self) -> Result<String, VoiceError> {
        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .map_err(|e| VoiceError::DeviceUnavailable(format!("no default microphone: {}", e)))?;
            device_id(&device).ok_or_else(|| VoiceError::DeviceUnavailable("GetId failed".into()))
        }
    }

    /// Look up an active capture device by ID.
    pub fn find_capture_device(&self, id: &str) -> Result<Option<AudioSource>, VoiceError> {
        Ok(self.list_capture_devices()?.into_iter().find(|d| d.id == id))
    }
}

unsafe fn device_id(device: &IMMDevice) -> Option<String> {
    device.GetId().ok().and_then(|id| id.to_string().ok())
}

/// Read a string property. Empty or non-string values read as `None`.
unsafe fn read_string_property(store: &IPropertyStore, key: &PROPERTYKEY) -> Option<String> {
    let value = store.GetValue(key).ok()?.to_string();
    (!value.is_empty()).then_some(value)
}

/// Classify by `PKEY_Device_EnumeratorName`.
unsafe fn detect_transport_type(store: &IPropertyStore) -> AudioTransportType {
    match read_string_property(store, &PKEY_Device_EnumeratorName) {
        Some(name) if name.contains("BTHLEENUM") => AudioTransportType::BluetoothLE,
        Some(name) if name.contains("BTHENUM") => AudioTransportType::Bluetooth,
        Some(name) if name.contains("USB") => AudioTransportType::Usb,
        Some(_) => AudioTransportType::BuiltIn,
        None => AudioTransportType::Unknown,
    }
}
