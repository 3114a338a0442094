use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::recording_result::RecognitionRequest;

/// Best-effort cancellation flag shared between a submission handle and the
/// backend call it guards.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The external speech recognition service.
///
/// Transport (HTTP, multipart upload, ...) is the implementor's concern. The
/// call may block for a full network round trip; it always runs on a
/// recognition worker thread, never on the control or capture threads.
/// Long-running implementations should poll `cancel` and bail out early.
pub trait RecognitionBackend: Send + Sync {
    /// Submit the payload. `Ok` carries the transcript, `Err` an opaque
    /// reason passed through to the host unchanged.
    fn submit(&self, request: &RecognitionRequest, cancel: &CancelToken) -> Result<String, String>;
}

impl<F> RecognitionBackend for F
where
    F: Fn(&RecognitionRequest, &CancelToken) -> Result<String, String> + Send + Sync,
{
    fn submit(&self, request: &RecognitionRequest, cancel: &CancelToken) -> Result<String, String> {
        self(request, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
