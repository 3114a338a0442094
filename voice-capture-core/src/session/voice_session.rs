use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::models::audio_models::{AudioSource, PoolStats};
use crate::models::config::{EngineConfig, RecordingOptions};
use crate::models::error::VoiceError;
use crate::models::recording_result::{RecognitionRequest, RecordingResult};
use crate::models::state::SessionState;
use crate::processing::wav_format;
use crate::session::engine::{CaptureEngine, CaptureObserver, CapturedAudio, FaultCallback, LevelCallback};
use crate::session::notifier::{EventNotifier, Notification};
use crate::session::submitter::{RecognitionSubmitter, SubmissionHandle};
use crate::storage::wav_writer;
use crate::traits::audio_input::AudioInput;
use crate::traits::event_sink::VoiceEventSink;
use crate::traits::recognition_backend::RecognitionBackend;

/// The recording that owns the current non-NONE phase.
#[derive(Debug, Clone)]
struct ActiveRecording {
    generation: u64,
    channel: u32,
    options: RecordingOptions,
}

/// State machine data, protected by `parking_lot::Mutex`.
///
/// `active` is `Some` exactly when `state` is not NONE.
struct MachineState {
    state: SessionState,
    active: Option<ActiveRecording>,
    in_flight: Option<SubmissionHandle>,
}

impl MachineState {
    fn new() -> Self {
        Self {
            state: SessionState::None,
            active: None,
            in_flight: None,
        }
    }

    fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    /// Move to `next` and queue the state event. Callers hold the lock, so
    /// the outbox order is the transition order.
    fn transition(&mut self, next: SessionState, channel: u32, notifier: &EventNotifier) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        if next.is_idle() {
            self.active = None;
            self.in_flight = None;
        }
        notifier.enqueue(channel, Notification::StateChanged(next));
    }
}

struct Shared {
    machine: Mutex<MachineState>,
    notifier: EventNotifier,
}

/// Read-only view of a session's state, usable from event sinks and other
/// threads without going through the owner of the `VoiceSession`.
#[derive(Clone)]
pub struct SessionStateHandle {
    shared: Weak<Shared>,
}

impl SessionStateHandle {
    /// NONE once the session has been dropped.
    pub fn get(&self) -> SessionState {
        self.shared
            .upgrade()
            .map(|shared| shared.machine.lock().state)
            .unwrap_or_default()
    }
}

/// Recording/recognition state machine over a capture engine.
///
/// ```text
/// start_recording ─▶ [CaptureEngine] ─▶ RECORDING
/// stop_recording  ─▶ WAV payload ─▶ [RecognitionSubmitter] ─▶ RECOGNIZING
/// completion      ─▶ result/error event ─▶ NONE
/// cancel/destroy  ─▶ NONE from anywhere
/// ```
///
/// Control operations take `&mut self`; hosts serialize them (typically by
/// holding the session in a mutex). Recognition completes on a worker thread
/// and is applied only if its generation still owns the RECOGNIZING phase,
/// so results of cancelled or superseded recordings are dropped silently.
pub struct VoiceSession<I: AudioInput> {
    engine: CaptureEngine<I>,
    submitter: RecognitionSubmitter,
    shared: Arc<Shared>,
    abandoned: Vec<SubmissionHandle>,
}

impl<I: AudioInput> VoiceSession<I> {
    pub fn new(
        input: I,
        backend: Arc<dyn RecognitionBackend>,
        sink: Arc<dyn VoiceEventSink>,
        config: EngineConfig,
    ) -> Result<Self, VoiceError> {
        let engine = CaptureEngine::new(input, config)?;
        Ok(Self {
            engine,
            submitter: RecognitionSubmitter::new(backend),
            shared: Arc::new(Shared {
                machine: Mutex::new(MachineState::new()),
                notifier: EventNotifier::new(sink),
            }),
            abandoned: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.shared.machine.lock().state
    }

    pub fn state_handle(&self) -> SessionStateHandle {
        SessionStateHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Whether the input device can be opened right now.
    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    pub fn device_info(&self) -> AudioSource {
        self.engine.device_info()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.engine.pool_stats()
    }

    /// Generation of the recording owning the current phase.
    pub fn active_generation(&self) -> Option<u64> {
        self.shared.machine.lock().active_generation()
    }

    /// NONE → RECORDING.
    ///
    /// Fails with `DeviceBusy` while recording and `InvalidState` while
    /// recognizing. Any failure leaves the state at NONE with no event.
    ///
    /// If the input dies mid-recording the session reports the error through
    /// `on_recognition_error` and returns to NONE; the audio is discarded.
    pub fn start_recording(&mut self, options: RecordingOptions) -> Result<(), VoiceError> {
        match self.state() {
            SessionState::None => {}
            SessionState::Recording => return Err(VoiceError::DeviceBusy),
            state => return Err(VoiceError::invalid_state("start recording", state)),
        }
        options.validate()?;

        let format = options.effective_format(self.engine.config().default_format);
        let channel = options.channel;
        let observer = CaptureObserver {
            on_level: Some(self.level_callback(channel)),
            on_fault: Some(self.fault_callback()),
        };
        let info = self.engine.start(format, observer)?;

        {
            let mut machine = self.shared.machine.lock();
            machine.active = Some(ActiveRecording {
                generation: info.generation,
                channel,
                options,
            });
            machine.transition(SessionState::Recording, channel, &self.shared.notifier);
        }
        self.shared.notifier.flush();

        // a fault between engine start and RECORDING found nothing to fail
        if self.engine.active_generation() != Some(info.generation) {
            let lost = VoiceError::DeviceUnavailable("input stopped while starting".into());
            fail_recording(&Arc::downgrade(&self.shared), info.generation, lost);
        }

        log::info!("channel {}: recording session {}", channel, info.generation);
        Ok(())
    }

    /// RECORDING → RECOGNIZING.
    ///
    /// Stops capture, writes the optional output file and hands the WAV
    /// payload to the recognition backend. The transcript arrives later
    /// through the event sink. Fails with `NotRecording` outside RECORDING.
    pub fn stop_recording(&mut self) -> Result<RecordingResult, VoiceError> {
        let active = {
            let machine = self.shared.machine.lock();
            match (&machine.active, machine.state) {
                (Some(active), SessionState::Recording) => active.clone(),
                _ => return Err(VoiceError::NotRecording),
            }
        };

        let captured = match self.engine.stop() {
            Ok(captured) => captured,
            Err(e) => {
                self.abort_recording(&active);
                return Err(e);
            }
        };
        let image = wav_format::encode_wav(&captured.format, &captured.pcm);

        if let Some(path) = &active.options.output_file_path {
            if let Err(e) = wav_writer::write_wav_file(path, &captured.format, &captured.pcm) {
                log::error!("channel {}: failed to write {}: {}", active.channel, path.display(), e);
                self.abort_recording(&active);
                return Err(e);
            }
        }

        let result = recording_result(&active, &captured, &image);
        let request = RecognitionRequest {
            generation: active.generation,
            payload: image,
            format: captured.format,
            api_key: active.options.api_key.clone().unwrap_or_default(),
            params: active.options.request_params(),
            form_data: active.options.form_data.clone(),
        };

        {
            let mut machine = self.shared.machine.lock();
            machine.transition(SessionState::Recognizing, active.channel, &self.shared.notifier);
        }
        self.shared.notifier.flush();

        let shared = Arc::downgrade(&self.shared);
        let generation = active.generation;
        let submitted = self.submitter.submit(request, move |outcome| {
            complete_recognition(&shared, generation, outcome);
        });
        match submitted {
            Ok(handle) => {
                let mut machine = self.shared.machine.lock();
                // the worker may already have completed and moved on
                if machine.state.is_recognizing() && machine.active_generation() == Some(generation) {
                    machine.in_flight = Some(handle);
                }
            }
            Err(e) => complete_recognition(&Arc::downgrade(&self.shared), generation, Err(e)),
        }

        log::info!(
            "channel {}: session {} recognizing {:.2}s of audio",
            active.channel,
            generation,
            result.duration_secs
        );
        Ok(result)
    }

    /// Any state → NONE.
    ///
    /// Discards captured audio, or abandons the in-flight recognition so its
    /// outcome is never reported. No-op when already NONE.
    pub fn cancel(&mut self) {
        if self.state().is_recording() {
            self.engine.abort();
        }

        let abandoned = {
            let mut machine = self.shared.machine.lock();
            let Some(active) = machine.active.clone() else {
                return;
            };
            let previous = machine.state;
            let in_flight = machine.in_flight.take();
            machine.transition(SessionState::None, active.channel, &self.shared.notifier);
            log::info!(
                "channel {}: session {} cancelled while {}",
                active.channel,
                active.generation,
                previous
            );
            in_flight
        };
        self.shared.notifier.flush();

        if let Some(handle) = abandoned {
            handle.cancel();
            self.abandoned.push(handle);
        }
        self.abandoned.retain(|h| !h.is_finished());
    }

    /// Cancel whatever is in progress and release the input device.
    ///
    /// The buffer pool stays allocated; the session can record again.
    pub fn destroy(&mut self) {
        self.cancel();
        self.engine.release();
        log::info!("voice session destroyed");
    }

    /// Block until workers of abandoned recognitions have exited.
    pub fn join_abandoned(&mut self) {
        for handle in self.abandoned.drain(..) {
            handle.join();
        }
    }

    fn level_callback(&self, channel: u32) -> LevelCallback {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |level: f32| {
            if let Some(shared) = shared.upgrade() {
                shared.notifier.volume(channel, level);
            }
        })
    }

    fn fault_callback(&self) -> FaultCallback {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |generation: u64, error: VoiceError| {
            fail_recording(&shared, generation, error);
        })
    }

    /// RECORDING → NONE after a failure on the stop path.
    fn abort_recording(&mut self, active: &ActiveRecording) {
        self.engine.abort();
        {
            let mut machine = self.shared.machine.lock();
            if machine.state.is_recording() && machine.active_generation() == Some(active.generation) {
                machine.transition(SessionState::None, active.channel, &self.shared.notifier);
            }
        }
        self.shared.notifier.flush();
    }
}

/// Apply a recognition outcome if `generation` still owns RECOGNIZING.
fn complete_recognition(shared: &Weak<Shared>, generation: u64, outcome: Result<String, VoiceError>) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    {
        let mut machine = shared.machine.lock();
        let channel = match &machine.active {
            Some(active) if machine.state.is_recognizing() && active.generation == generation => {
                active.channel
            }
            _ => {
                log::debug!("discarding recognition outcome of session {}", generation);
                return;
            }
        };

        let notification = match outcome {
            Ok(transcript) => Notification::RecognitionResult(transcript),
            Err(e) => {
                log::warn!("channel {}: session {} {}", channel, generation, e);
                Notification::RecognitionError(e)
            }
        };
        shared.notifier.enqueue(channel, notification);
        machine.transition(SessionState::None, channel, &shared.notifier);
    }
    shared.notifier.flush();
}

/// RECORDING → NONE when the input stream of `generation` died.
fn fail_recording(shared: &Weak<Shared>, generation: u64, error: VoiceError) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    {
        let mut machine = shared.machine.lock();
        let channel = match &machine.active {
            Some(active) if machine.state.is_recording() && active.generation == generation => active.channel,
            _ => return,
        };
        log::warn!("channel {}: session {} lost its input: {}", channel, generation, error);
        shared.notifier.enqueue(channel, Notification::RecognitionError(error));
        machine.transition(SessionState::None, channel, &shared.notifier);
    }
    shared.notifier.flush();
}

fn recording_result(active: &ActiveRecording, captured: &CapturedAudio, image: &[u8]) -> RecordingResult {
    RecordingResult::new(
        active.generation,
        active.channel,
        captured.format,
        active.options.output_file_path.clone(),
        captured.pcm.len() as u64,
        captured.buffers_filled,
        wav_writer::sha256_hex(image),
    )
}
