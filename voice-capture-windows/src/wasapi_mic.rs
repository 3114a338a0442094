//! WASAPI microphone input.
//!
//! Captures from a WASAPI capture endpoint in shared mode. The device mix
//! format (Float32, device rate and channel count) is converted to the
//! session's PCM layout before reaching the engine callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::{Error, PCWSTR};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use voice_capture_core::models::audio_models::{AudioFormat, AudioSource, AudioTransportType};
use voice_capture_core::models::error::VoiceError;
use voice_capture_core::processing::pcm::PcmConverter;
use voice_capture_core::traits::audio_input::{AudioInput, PcmCallback, StreamErrorCallback};

use crate::device_enumerator::DeviceEnumerator;
use crate::permissions::{self, MicrophoneAccess};

/// How long `open` waits for the capture thread to start the stream.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// WASAPI microphone input.
///
/// Opens a capture endpoint in shared mode and delivers PCM on a dedicated
/// thread registered with MMCSS.
pub struct WasapiMicInput {
    device_id: Option<String>,
    device_name: String,
    is_default: bool,
    transport_type: Option<AudioTransportType>,
    running: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

// SAFETY: All Windows COM objects are created and used on the capture thread.
// The struct fields are either atomics, Mutex-protected, or plain data.
unsafe impl Send for WasapiMicInput {}
unsafe impl Sync for WasapiMicInput {}

impl WasapiMicInput {
    /// Input for the system default microphone.
    pub fn default_device() -> Self {
        Self {
            device_id: None,
            device_name: "Default Microphone".into(),
            is_default: true,
            transport_type: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        }
    }

    /// Input for a specific microphone, as listed by `DeviceEnumerator`.
    pub fn with_device(source: AudioSource) -> Self {
        Self {
            device_id: Some(source.id),
            device_name: source.name,
            is_default: source.is_default,
            transport_type: source.transport_type,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        }
    }
}

impl AudioInput for WasapiMicInput {
    fn is_available(&self) -> bool {
        let usable = permissions::microphone_access()
            .map(MicrophoneAccess::is_usable)
            .unwrap_or(false);
        if !usable {
            return false;
        }
        with_com(|| {
            DeviceEnumerator::new()
                .and_then(|e| e.list_capture_devices())
                .map(|devices| match &self.device_id {
                    Some(id) => devices.iter().any(|d| &d.id == id),
                    None => !devices.is_empty(),
                })
                .unwrap_or(false)
        })
    }

    fn open(
        &mut self,
        format: AudioFormat,
        callback: PcmCallback,
        on_error: StreamErrorCallback,
    ) -> Result<(), VoiceError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(VoiceError::DeviceBusy);
        }
        // the access check targets the default endpoint; only the privacy toggle
        // applies to every device
        let access = permissions::microphone_access()?;
        let applies = access == MicrophoneAccess::Denied || self.device_id.is_none();
        if let (true, Some(reason)) = (applies, access.unavailable_reason()) {
            return Err(VoiceError::DeviceUnavailable(reason.into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let device_id = self.device_id.clone();
        let (started_tx, started_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("wasapi-mic-capture".into())
            .spawn(move || {
                if let Err(e) = mic_capture_loop(&running, device_id, format, callback, &started_tx) {
                    log::error!("mic capture error: {}", e);
                    // once `open` has returned its receiver is gone
                    if let Err(mpsc::SendError(Err(e))) = started_tx.send(Err(e)) {
                        running.store(false, Ordering::SeqCst);
                        on_error(e);
                        return;
                    }
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                VoiceError::DeviceUnavailable(format!("failed to spawn mic thread: {}", e))
            })?;
        *self.capture_handle.lock() = Some(handle);

        let started = started_rx
            .recv_timeout(START_TIMEOUT)
            .unwrap_or_else(|_| Err(VoiceError::DeviceUnavailable("capture stream did not start".into())));
        if started.is_err() {
            let _ = self.close();
        }
        started
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn device_info(&self) -> AudioSource {
        AudioSource {
            id: self.device_id.clone().unwrap_or_else(|| "default-mic".into()),
            name: self.device_name.clone(),
            is_default: self.is_default,
            transport_type: self.transport_type,
        }
    }
}

impl Drop for WasapiMicInput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Main capture loop running on a dedicated thread.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Get capture device (default or by ID)
/// 3. Activate IAudioClient
/// 4. Initialize in shared mode with the device mix format
/// 5. Get IAudioCaptureClient service
/// 6. Register with MMCSS for real-time priority
/// 7. Start capture, report readiness, poll for packets
fn mic_capture_loop(
    running: &AtomicBool,
    device_id: Option<String>,
    format: AudioFormat,
    callback: PcmCallback,
    started: &mpsc::Sender<Result<(), VoiceError>>,
) -> Result<(), VoiceError> {
    let unavailable = |what: &str, e: Error| VoiceError::DeviceUnavailable(format!("{} failed: {}", what, e));

    unsafe {
        CoInitializeEx(None, COINIT_MULTITHREADED)
            .ok()
            .map_err(|e| unavailable("CoInitializeEx", e))?;
        let _com_guard = CoUninitializeGuard;

        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|e| unavailable("CoCreateInstance", e))?;

        let device = if let Some(ref id) = device_id {
            let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
            enumerator
                .GetDevice(PCWSTR(wide_id.as_ptr()))
                .map_err(|e| unavailable("GetDevice", e))?
        } else {
            enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .map_err(|e| unavailable("GetDefaultAudioEndpoint", e))?
        };

        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| unavailable("Activate", e))?;

        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| unavailable("GetMixFormat", e))?;
        let mix_format = &*mix_format_ptr;
        let source_rate = mix_format.nSamplesPerSec as f64;
        let source_channels = mix_format.nChannels;

        // 100ms in 100-nanosecond units
        let buffer_duration = 1_000_000;
        let initialized = audio_client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST,
            buffer_duration,
            0,
            mix_format,
            None,
        );
        CoTaskMemFree(Some(mix_format_ptr as *const _ as *const _));
        initialized.map_err(|e| unavailable("IAudioClient::Initialize", e))?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| unavailable("GetService", e))?;

        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        audio_client
            .Start()
            .map_err(|e| unavailable("IAudioClient::Start", e))?;
        let _ = started.send(Ok(()));
        log::debug!(
            "mic stream started: device {} Hz x{} → {} Hz x{} {} bit",
            source_rate,
            source_channels,
            format.sample_rate,
            format.channels,
            format.bits_per_sample
        );

        let mut converter = PcmConverter::new(format);
        let mut silence = Vec::new();

        while running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));

            let mut packet_length = capture_client
                .GetNextPacketSize()
                .map_err(|e| unavailable("GetNextPacketSize", e))?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                capture_client
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .map_err(|e| unavailable("GetBuffer", e))?;

                if num_frames > 0 && !buffer_ptr.is_null() {
                    let total_samples = num_frames as usize * source_channels as usize;

                    // shared mode delivers Float32
                    let samples = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        silence.resize(total_samples, 0.0f32);
                        &silence[..total_samples]
                    } else {
                        std::slice::from_raw_parts(buffer_ptr as *const f32, total_samples)
                    };
                    callback(converter.convert(samples, source_rate, source_channels));
                }

                capture_client
                    .ReleaseBuffer(num_frames)
                    .map_err(|e| unavailable("ReleaseBuffer", e))?;

                packet_length = capture_client
                    .GetNextPacketSize()
                    .map_err(|e| unavailable("GetNextPacketSize", e))?;
            }
        }

        let _ = audio_client.Stop();
    }

    Ok(())
}

/// Run `f` with COM initialized on the calling thread.
fn with_com<T: Default>(f: impl FnOnce() -> T) -> T {
    unsafe {
        if CoInitializeEx(None, COINIT_MULTITHREADED).is_err() {
            return T::default();
        }
        let _com_guard = CoUninitializeGuard;
        f()
    }
}

/// RAII guard to call CoUninitialize when dropped.
struct CoUninitializeGuard;

impl Drop for CoUninitializeGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
