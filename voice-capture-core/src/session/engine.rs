use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::models::audio_models::{AudioFormat, AudioSource, PoolStats};
use crate::models::config::EngineConfig;
use crate::models::error::VoiceError;
use crate::processing::buffer_pool::{AudioBuffer, AudioBufferPool};
use crate::processing::pcm;
use crate::traits::audio_input::{AudioInput, PcmCallback, StreamErrorCallback};

/// Receives the RMS level of every filled buffer, on the capture thread.
pub type LevelCallback = Arc<dyn Fn(f32) + Send + Sync + 'static>;

/// Receives the generation and error of a session whose input stream died.
/// By the time it runs the engine has already dropped that session.
pub type FaultCallback = Arc<dyn Fn(u64, VoiceError) + Send + Sync + 'static>;

/// Hooks one capture session reports through.
#[derive(Clone, Default)]
pub struct CaptureObserver {
    pub on_level: Option<LevelCallback>,
    pub on_fault: Option<FaultCallback>,
}

/// Identity of a started capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSessionInfo {
    /// Session generation stamp. Strictly increasing per engine.
    pub generation: u64,
    pub format: AudioFormat,
    /// Bytes that make one buffer "filled" for this format.
    pub buffer_bytes: usize,
}

/// Audio handed back by `CaptureEngine::stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub generation: u64,
    pub format: AudioFormat,
    /// Raw PCM in `format`, whole packets only.
    pub pcm: Vec<u8>,
    pub packets: u64,
    pub buffers_filled: u64,
}

/// In-memory accumulation sink of one capture session.
///
/// Audio lands in segments of `segment_bytes`, a whole number of packets.
/// A full segment is never grown, so a fill never moves earlier audio;
/// segments are joined once, at stop.
#[derive(Debug)]
struct PayloadSink {
    segments: Vec<Vec<u8>>,
    segment_bytes: usize,
    buffers: u64,
    finished: bool,
}

impl PayloadSink {
    fn new(first: Vec<u8>, segment_bytes: usize) -> Self {
        let mut segments = Vec::with_capacity(8);
        segments.push(first);
        Self {
            segments,
            segment_bytes,
            buffers: 0,
            finished: false,
        }
    }

    fn accept(&mut self, mut bytes: &[u8], is_final: bool) {
        if self.finished {
            return;
        }
        if !bytes.is_empty() {
            self.buffers += 1;
        }
        while !bytes.is_empty() {
            let full = self.segments.last().map_or(true, |s| s.len() >= self.segment_bytes);
            if full {
                let mut segment = Vec::new();
                if let Err(e) = segment.try_reserve_exact(self.segment_bytes) {
                    log::error!(
                        "payload segment of {} bytes: {}, dropping {} bytes",
                        self.segment_bytes,
                        e,
                        bytes.len()
                    );
                    break;
                }
                self.segments.push(segment);
            }
            let Some(segment) = self.segments.last_mut() else {
                break;
            };
            let n = (self.segment_bytes - segment.len()).min(bytes.len());
            segment.extend_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
        }
        self.finished = is_final;
    }

    fn into_pcm(mut self) -> Vec<u8> {
        if self.segments.len() == 1 {
            return self.segments.pop().unwrap_or_default();
        }
        self.segments.concat()
    }
}

/// Per-recording state. Exists from `start` until `stop`/`abort`, or until
/// the input reports a fault.
#[derive(Debug)]
struct CaptureSession {
    generation: u64,
    format: AudioFormat,
    buffer_bytes: usize,
    packets: u64,
    sink: PayloadSink,
}

impl CaptureSession {
    /// Forward the valid packets of a filled buffer to the sink and return
    /// the buffer's level.
    fn drain(&mut self, buffer: &AudioBuffer, is_final: bool) -> f32 {
        let per_packet = self.format.bytes_per_packet();
        let packets = buffer.len() / per_packet;
        let valid = &buffer.bytes()[..packets * per_packet];
        self.packets += packets as u64;
        self.sink.accept(valid, is_final);
        pcm::rms_level(valid, &self.format)
    }

    fn into_captured(self) -> CapturedAudio {
        CapturedAudio {
            generation: self.generation,
            format: self.format,
            packets: self.packets,
            buffers_filled: self.sink.buffers,
            pcm: self.sink.into_pcm(),
        }
    }
}

/// State shared between the control thread and the capture callback.
struct EngineCore {
    pool: AudioBufferPool,
    session: Option<CaptureSession>,
}

impl EngineCore {
    /// Fill handler. Copies `bytes` into the rotation, draining and recycling
    /// each buffer as it fills. Returns the level of the last filled buffer.
    fn fill(&mut self, generation: u64, mut bytes: &[u8]) -> Option<f32> {
        let Self { pool, session } = self;
        let session = match session.as_mut() {
            Some(s) if s.generation == generation => s,
            _ => {
                log::debug!("dropping stale capture callback for session {}", generation);
                return None;
            }
        };

        let mut level = None;
        while !bytes.is_empty() {
            let Some(buffer) = pool.current_mut() else {
                log::warn!("no capture buffer queued, dropping {} bytes", bytes.len());
                break;
            };
            let consumed = buffer.fill_from(bytes, session.buffer_bytes);
            bytes = &bytes[consumed..];
            if !buffer.is_full(session.buffer_bytes) {
                break;
            }
            if let Some(filled) = pool.take_filled() {
                level = Some(session.drain(&filled, false));
                pool.recycle(filled);
            }
        }
        level
    }

    /// Remove the active session, flushing a partially filled buffer into it.
    fn finish_session(&mut self) -> Option<CaptureSession> {
        let mut session = self.session.take()?;
        let partial = self.pool.current_mut().map(|b| !b.is_empty()).unwrap_or(false);
        if partial {
            if let Some(buffer) = self.pool.take_filled() {
                session.drain(&buffer, true);
                self.pool.recycle(buffer);
            }
        } else {
            session.sink.accept(&[], true);
        }
        self.pool.reset();
        Some(session)
    }

    /// Drop the session of `generation` after its stream died. False when a
    /// different session (or none) is active.
    fn fail_session(&mut self, generation: u64) -> bool {
        if self.session.as_ref().map(|s| s.generation) != Some(generation) {
            return false;
        }
        self.session = None;
        self.pool.reset();
        true
    }
}

/// Owns the hardware input and the buffer pool, and turns the device's PCM
/// stream into an in-memory payload for one recording at a time.
///
/// ```text
/// [AudioInput] ─callback─▶ [pool buffer] ─filled─▶ [PayloadSink]
///                               ▲                        │
///                               └──────── recycle ───────┘
/// ```
///
/// The capture callbacks hold only a `Weak` to the shared core plus the
/// session generation, so callbacks that outlive their session or the engine
/// are dropped.
pub struct CaptureEngine<I: AudioInput> {
    input: I,
    config: EngineConfig,
    core: Arc<Mutex<EngineCore>>,
    next_generation: u64,
    input_open: bool,
}

impl<I: AudioInput> CaptureEngine<I> {
    /// Validate `config` and allocate the buffer pool.
    ///
    /// Buffers are sized for the widest supported format so any per-recording
    /// format fits without reallocation.
    pub fn new(input: I, config: EngineConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        let pool = AudioBufferPool::allocate(config.buffer_count, config.max_buffer_bytes())?;
        Ok(Self {
            input,
            config,
            core: Arc::new(Mutex::new(EngineCore {
                pool,
                session: None,
            })),
            next_generation: 1,
            input_open: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_available(&self) -> bool {
        self.input.is_available()
    }

    pub fn device_info(&self) -> AudioSource {
        self.input.device_info()
    }

    pub fn is_active(&self) -> bool {
        self.core.lock().session.is_some()
    }

    /// Generation of the active session, if any.
    pub fn active_generation(&self) -> Option<u64> {
        self.core.lock().session.as_ref().map(|s| s.generation)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.core.lock().pool.stats()
    }

    /// Open the input in `format` and start accumulating.
    ///
    /// Fails with `DeviceBusy` if a session is already active. On any failure
    /// no session survives and the device is closed.
    pub fn start(
        &mut self,
        format: AudioFormat,
        observer: CaptureObserver,
    ) -> Result<CaptureSessionInfo, VoiceError> {
        format.validate()?;
        let buffer_bytes = format.buffer_bytes_for(self.config.buffer_duration_ms);

        let generation = {
            let mut core = self.core.lock();
            if core.session.is_some() {
                return Err(VoiceError::DeviceBusy);
            }
            if buffer_bytes > core.pool.buffer_size() {
                return Err(VoiceError::Configuration(format!(
                    "{} byte buffers exceed pool buffers of {} bytes",
                    buffer_bytes,
                    core.pool.buffer_size()
                )));
            }

            let segment_bytes =
                (format.byte_rate() as usize * self.config.payload_reserve_secs as usize).max(buffer_bytes);
            let mut first = Vec::new();
            first
                .try_reserve_exact(segment_bytes)
                .map_err(|e| VoiceError::Allocation(format!("payload reserve of {} bytes: {}", segment_bytes, e)))?;

            let generation = self.next_generation;
            self.next_generation += 1;
            core.pool.reset();
            core.session = Some(CaptureSession {
                generation,
                format,
                buffer_bytes,
                packets: 0,
                sink: PayloadSink::new(first, segment_bytes),
            });
            generation
        };

        // a stream that faulted earlier is still marked open
        self.close_input();

        let CaptureObserver { on_level, on_fault } = observer;
        let callback = fill_callback(Arc::downgrade(&self.core), generation, on_level);
        let on_error = fault_callback(Arc::downgrade(&self.core), generation, on_fault);
        if let Err(e) = self.input.open(format, callback, on_error) {
            log::warn!("capture session {} failed to open input: {}", generation, e);
            let _ = self.input.close();
            let mut core = self.core.lock();
            core.session = None;
            core.pool.reset();
            return Err(e);
        }
        self.input_open = true;

        log::info!(
            "capture session {} started: {} Hz, {} ch, {} bit, {} byte buffers",
            generation,
            format.sample_rate,
            format.channels,
            format.bits_per_sample,
            buffer_bytes
        );
        Ok(CaptureSessionInfo {
            generation,
            format,
            buffer_bytes,
        })
    }

    /// Stop the input, flush the partially filled buffer and hand back the
    /// accumulated audio. Fails with `NotRecording` when no session is active.
    pub fn stop(&mut self) -> Result<CapturedAudio, VoiceError> {
        if !self.is_active() {
            return Err(VoiceError::NotRecording);
        }
        self.close_input();

        let session = self
            .core
            .lock()
            .finish_session()
            .ok_or(VoiceError::NotRecording)?;
        let captured = session.into_captured();
        log::info!(
            "capture session {} stopped: {} packets in {} buffers",
            captured.generation,
            captured.packets,
            captured.buffers_filled
        );
        Ok(captured)
    }

    /// Stop the input and discard the active session's audio. Returns whether
    /// a session was active.
    pub fn abort(&mut self) -> bool {
        self.close_input();
        let mut core = self.core.lock();
        let aborted = core.session.take();
        core.pool.reset();
        if let Some(session) = &aborted {
            log::info!("capture session {} aborted", session.generation);
        }
        aborted.is_some()
    }

    /// Abort any session and make sure the device is released.
    pub fn release(&mut self) {
        self.abort();
        if let Err(e) = self.input.close() {
            log::warn!("failed to release audio input: {}", e);
        }
    }

    fn close_input(&mut self) {
        if !self.input_open {
            return;
        }
        self.input_open = false;
        if let Err(e) = self.input.close() {
            log::warn!("failed to close audio input: {}", e);
        }
    }
}

impl<I: AudioInput> Drop for CaptureEngine<I> {
    fn drop(&mut self) {
        self.abort();
    }
}

fn fill_callback(
    core: Weak<Mutex<EngineCore>>,
    generation: u64,
    on_level: Option<LevelCallback>,
) -> PcmCallback {
    Arc::new(move |bytes: &[u8]| {
        let Some(core) = core.upgrade() else {
            return;
        };
        let level = core.lock().fill(generation, bytes);
        if let (Some(level), Some(on_level)) = (level, &on_level) {
            on_level(level);
        }
    })
}

fn fault_callback(
    core: Weak<Mutex<EngineCore>>,
    generation: u64,
    on_fault: Option<FaultCallback>,
) -> StreamErrorCallback {
    Arc::new(move |error: VoiceError| {
        let Some(core) = core.upgrade() else {
            return;
        };
        let failed = core.lock().fail_session(generation);
        if !failed {
            log::debug!("ignoring stream error of stale capture session {}: {}", generation, error);
            return;
        }
        log::error!("capture session {} lost its input: {}", generation, error);
        if let Some(on_fault) = &on_fault {
            on_fault(generation, error);
        }
    })
}
