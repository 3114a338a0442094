use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::models::error::VoiceError;
use crate::models::recording_result::RecognitionRequest;
use crate::traits::recognition_backend::{CancelToken, RecognitionBackend};

/// Handle to one in-flight recognition.
///
/// Dropping it detaches the worker; the completion still runs but its
/// consumer is expected to discard it by generation.
#[derive(Debug)]
pub struct SubmissionHandle {
    generation: u64,
    cancel: CancelToken,
    worker: Option<thread::JoinHandle<()>>,
}

impl SubmissionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Best-effort: the backend sees the flag through its `CancelToken`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map(|w| w.is_finished()).unwrap_or(true)
    }

    /// Block until the worker, including its completion callback, has exited.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("recognition worker {} panicked", self.generation);
            }
        }
    }
}

/// Runs recognition backend calls on dedicated worker threads.
pub struct RecognitionSubmitter {
    backend: Arc<dyn RecognitionBackend>,
}

impl RecognitionSubmitter {
    pub fn new(backend: Arc<dyn RecognitionBackend>) -> Self {
        Self { backend }
    }

    /// Start recognizing `request` off the calling thread.
    ///
    /// `on_complete` runs exactly once on the worker with the transcript or a
    /// `Submission` error, whether or not the handle was cancelled. Fails
    /// synchronously only if the worker cannot be spawned, in which case
    /// `on_complete` is never called.
    pub fn submit<F>(&self, request: RecognitionRequest, on_complete: F) -> Result<SubmissionHandle, VoiceError>
    where
        F: FnOnce(Result<String, VoiceError>) + Send + 'static,
    {
        let generation = request.generation;
        let cancel = CancelToken::new();
        let backend = Arc::clone(&self.backend);
        let token = cancel.clone();

        let worker = thread::Builder::new()
            .name(format!("recognition-{}", generation))
            .spawn(move || {
                log::debug!(
                    "submitting {} byte payload for session {}",
                    request.payload.len(),
                    generation
                );
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.submit(&request, &token)))
                    .unwrap_or_else(|_| Err("recognition backend panicked".to_string()))
                    .map_err(VoiceError::Submission);
                if token.is_cancelled() {
                    log::debug!("recognition for session {} finished after cancel", generation);
                }
                on_complete(outcome);
            })
            .map_err(|e| VoiceError::Submission(format!("failed to spawn recognition worker: {}", e)))?;

        Ok(SubmissionHandle {
            generation,
            cancel,
            worker: Some(worker),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::models::audio_models::AudioFormat;

    fn request(generation: u64) -> RecognitionRequest {
        RecognitionRequest {
            generation,
            payload: vec![0; 8],
            format: AudioFormat::speech(),
            api_key: "key".into(),
            params: HashMap::new(),
            form_data: HashMap::new(),
        }
    }

    fn submit_and_wait(backend: Arc<dyn RecognitionBackend>) -> Result<String, VoiceError> {
        let submitter = RecognitionSubmitter::new(backend);
        let (tx, rx) = mpsc::channel();
        let handle = submitter
            .submit(request(1), move |outcome| {
                let _ = tx.send(outcome);
            })
            .unwrap();
        handle.join();
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn transcript_reaches_completion() {
        let backend: Arc<dyn RecognitionBackend> =
            Arc::new(|req: &RecognitionRequest, _: &CancelToken| -> Result<String, String> {
                Ok(format!("{} bytes", req.payload.len()))
            });
        assert_eq!(submit_and_wait(backend), Ok("8 bytes".to_string()));
    }

    #[test]
    fn backend_error_is_submission_error() {
        let backend: Arc<dyn RecognitionBackend> =
            Arc::new(|_: &RecognitionRequest, _: &CancelToken| -> Result<String, String> {
                Err("HTTP 503".to_string())
            });
        assert_eq!(
            submit_and_wait(backend),
            Err(VoiceError::Submission("HTTP 503".into()))
        );
    }

    #[test]
    fn backend_panic_still_completes() {
        let backend: Arc<dyn RecognitionBackend> =
            Arc::new(|_: &RecognitionRequest, _: &CancelToken| -> Result<String, String> { panic!("boom") });
        assert!(matches!(submit_and_wait(backend), Err(VoiceError::Submission(_))));
    }

    #[test]
    fn cancel_is_visible_to_backend() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);
        let backend: Arc<dyn RecognitionBackend> = Arc::new(move |_: &RecognitionRequest, cancel: &CancelToken| -> Result<String, String> {
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
            if cancel.is_cancelled() {
                Err("cancelled".to_string())
            } else {
                Ok("late".to_string())
            }
        });

        let submitter = RecognitionSubmitter::new(backend);
        let (tx, rx) = mpsc::channel();
        let handle = submitter
            .submit(request(7), move |outcome| {
                let _ = tx.send(outcome);
            })
            .unwrap();
        assert_eq!(handle.generation(), 7);

        handle.cancel();
        assert!(handle.is_cancelled());
        release_tx.send(()).unwrap();
        handle.join();

        // completion still fires exactly once
        let outcomes: Vec<_> = rx.try_iter().collect();
        assert_eq!(outcomes, vec![Err(VoiceError::Submission("cancelled".into()))]);
    }
}
