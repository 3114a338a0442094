//! Scripted doubles for the audio input and recognition backend.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioFormat, AudioSource, AudioTransportType};
use crate::models::error::VoiceError;
use crate::models::event::VoiceEvent;
use crate::models::recording_result::RecognitionRequest;
use crate::traits::audio_input::{AudioInput, PcmCallback, StreamErrorCallback};
use crate::traits::recognition_backend::{CancelToken, RecognitionBackend};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct InputState {
    unavailable: bool,
    callback: Option<PcmCallback>,
    on_error: Option<StreamErrorCallback>,
    format: Option<AudioFormat>,
    history: Vec<PcmCallback>,
    opens: usize,
    closes: usize,
}

/// Audio input driven by the test: `push` plays the role of the hardware
/// callback. Clones share state, so a test keeps one clone while the engine
/// owns another.
#[derive(Clone, Default)]
pub(crate) struct ScriptedInput {
    state: Arc<Mutex<InputState>>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// An input whose `open` fails with `DeviceUnavailable`.
    pub fn unavailable() -> Self {
        let input = Self::default();
        input.state.lock().unavailable = true;
        input
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    pub fn opened_format(&self) -> Option<AudioFormat> {
        self.state.lock().format
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Deliver bytes through the open stream. Returns false when closed.
    pub fn push(&self, bytes: &[u8]) -> bool {
        let callback = self.state.lock().callback.clone();
        match callback {
            Some(callback) => {
                callback(bytes);
                true
            }
            None => false,
        }
    }

    /// Report a stream failure the way a dying device does. The stream stays
    /// marked open until the engine closes it.
    pub fn fail(&self, error: VoiceError) {
        let on_error = self.state.lock().on_error.clone();
        if let Some(on_error) = on_error {
            on_error(error);
        }
    }

    /// Deliver bytes through the callback of the `nth` open, even if that
    /// stream has since been closed.
    pub fn push_stale(&self, nth: usize, bytes: &[u8]) {
        let callback = self.state.lock().history.get(nth).cloned();
        if let Some(callback) = callback {
            callback(bytes);
        }
    }
}

impl AudioInput for ScriptedInput {
    fn is_available(&self) -> bool {
        !self.state.lock().unavailable
    }

    fn open(
        &mut self,
        format: AudioFormat,
        callback: PcmCallback,
        on_error: StreamErrorCallback,
    ) -> Result<(), VoiceError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(VoiceError::DeviceUnavailable("scripted input unavailable".into()));
        }
        state.opens += 1;
        state.format = Some(format);
        state.history.push(Arc::clone(&callback));
        state.callback = Some(callback);
        state.on_error = Some(on_error);
        Ok(())
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        let mut state = self.state.lock();
        state.on_error = None;
        if state.callback.take().is_some() {
            state.closes += 1;
        }
        Ok(())
    }

    fn device_info(&self) -> AudioSource {
        AudioSource {
            id: "scripted".into(),
            name: "Scripted Input".into(),
            is_default: true,
            transport_type: Some(AudioTransportType::Virtual),
        }
    }
}

/// Backend that answers immediately and records every request.
pub(crate) struct ImmediateBackend {
    outcome: Result<String, String>,
    pub requests: Mutex<Vec<RecognitionRequest>>,
}

impl ImmediateBackend {
    pub fn transcript(text: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(reason.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

impl RecognitionBackend for ImmediateBackend {
    fn submit(&self, request: &RecognitionRequest, _cancel: &CancelToken) -> Result<String, String> {
        self.requests.lock().push(request.clone());
        self.outcome.clone()
    }
}

/// Backend that blocks until the test releases it.
///
/// `entered` receives each request's generation when the backend call starts;
/// `returned` receives it just before the call returns.
pub(crate) struct GatedBackend {
    transcript: String,
    gate: Mutex<Receiver<()>>,
    entered: Mutex<Sender<u64>>,
    returned: Mutex<Sender<u64>>,
}

pub(crate) struct Gate {
    pub release: Sender<()>,
    pub entered: Receiver<u64>,
    pub returned: Receiver<u64>,
}

impl GatedBackend {
    pub fn new(transcript: &str) -> (Arc<Self>, Gate) {
        let (release, gate) = mpsc::channel();
        let (entered_tx, entered) = mpsc::channel();
        let (returned_tx, returned) = mpsc::channel();
        let backend = Arc::new(Self {
            transcript: transcript.to_string(),
            gate: Mutex::new(gate),
            entered: Mutex::new(entered_tx),
            returned: Mutex::new(returned_tx),
        });
        (
            backend,
            Gate {
                release,
                entered,
                returned,
            },
        )
    }
}

impl RecognitionBackend for GatedBackend {
    fn submit(&self, request: &RecognitionRequest, _cancel: &CancelToken) -> Result<String, String> {
        let _ = self.entered.lock().send(request.generation);
        let released = self.gate.lock().recv_timeout(WAIT).is_ok();
        let _ = self.returned.lock().send(request.generation);
        if released {
            Ok(self.transcript.clone())
        } else {
            Err("gate never released".to_string())
        }
    }
}

/// Receive non-volume events until `count` have arrived or the wait times out.
pub(crate) fn recv_events(rx: &Receiver<VoiceEvent>, count: usize) -> Vec<VoiceEvent> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        match rx.recv_timeout(WAIT) {
            Ok(VoiceEvent::VolumeChanged { .. }) => {}
            Ok(event) => events.push(event),
            Err(_) => break,
        }
    }
    events
}

/// Drain non-volume events currently queued.
pub(crate) fn drain_events(rx: &Receiver<VoiceEvent>) -> Vec<VoiceEvent> {
    rx.try_iter()
        .filter(|e| !matches!(e, VoiceEvent::VolumeChanged { .. }))
        .collect()
}
