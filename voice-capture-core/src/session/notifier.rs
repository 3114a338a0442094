use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::models::error::VoiceError;
use crate::models::state::SessionState;
use crate::traits::event_sink::VoiceEventSink;

/// A queued host notification.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Notification {
    StateChanged(SessionState),
    RecognitionResult(String),
    RecognitionError(VoiceError),
}

#[derive(Debug)]
struct Pending {
    channel: u32,
    notification: Notification,
}

/// Ordered delivery of state and recognition events to the host sink.
///
/// Transitions `enqueue` while holding the state-machine lock, so the outbox
/// order is the transition order. `flush` runs after that lock is released and
/// delivers under a separate dispatch lock: one dispatcher at a time, FIFO,
/// and the sink is free to read session state.
///
/// A sink may also drive the session from inside a callback (restart
/// recording on a result, for instance). The nested `flush` on the
/// dispatching thread returns at once and the outer loop delivers whatever
/// the nested call queued, after the event currently being delivered.
pub(crate) struct EventNotifier {
    sink: Arc<dyn VoiceEventSink>,
    outbox: Mutex<VecDeque<Pending>>,
    dispatch: Mutex<()>,
    dispatcher: Mutex<Option<ThreadId>>,
}

/// Marks the current thread as the dispatcher until dropped.
struct DispatcherMark<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> DispatcherMark<'a> {
    fn claim(slot: &'a Mutex<Option<ThreadId>>, thread: ThreadId) -> Self {
        *slot.lock() = Some(thread);
        Self { slot }
    }
}

impl Drop for DispatcherMark<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

impl EventNotifier {
    pub fn new(sink: Arc<dyn VoiceEventSink>) -> Self {
        Self {
            sink,
            outbox: Mutex::new(VecDeque::new()),
            dispatch: Mutex::new(()),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, channel: u32, notification: Notification) {
        self.outbox.lock().push_back(Pending {
            channel,
            notification,
        });
    }

    /// Deliver everything queued, including events enqueued by other threads
    /// while this flush runs.
    pub fn flush(&self) {
        let current = thread::current().id();
        if *self.dispatcher.lock() == Some(current) {
            return;
        }
        let _dispatching = self.dispatch.lock();
        let _mark = DispatcherMark::claim(&self.dispatcher, current);
        loop {
            let next = self.outbox.lock().pop_front();
            let Some(pending) = next else {
                break;
            };
            self.deliver(pending);
        }
    }

    /// Volume events bypass the outbox.
    pub fn volume(&self, channel: u32, level: f32) {
        self.sink.on_volume_changed(channel, level);
    }

    fn deliver(&self, pending: Pending) {
        let Pending {
            channel,
            notification,
        } = pending;
        match notification {
            Notification::StateChanged(state) => {
                log::debug!("channel {}: state -> {}", channel, state);
                self.sink.on_state_changed(channel, state);
            }
            Notification::RecognitionResult(transcript) => {
                self.sink.on_recognition_result(channel, &transcript);
            }
            Notification::RecognitionError(error) => {
                self.sink.on_recognition_error(channel, &error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, OnceLock, Weak};

    use super::*;
    use crate::models::event::VoiceEvent;

    #[test]
    fn nothing_delivered_until_flush() {
        let (tx, rx) = mpsc::channel::<VoiceEvent>();
        let notifier = EventNotifier::new(Arc::new(tx));

        notifier.enqueue(1, Notification::StateChanged(SessionState::Recording));
        assert!(rx.try_recv().is_err());

        notifier.flush();
        assert_eq!(
            rx.try_recv().unwrap(),
            VoiceEvent::StateChanged {
                channel: 1,
                state: SessionState::Recording
            }
        );
    }

    #[test]
    fn flush_preserves_enqueue_order() {
        let (tx, rx) = mpsc::channel::<VoiceEvent>();
        let notifier = EventNotifier::new(Arc::new(tx));

        notifier.enqueue(0, Notification::StateChanged(SessionState::Recognizing));
        notifier.enqueue(0, Notification::RecognitionError(VoiceError::Submission("timeout".into())));
        notifier.enqueue(0, Notification::StateChanged(SessionState::None));
        notifier.flush();

        let events: Vec<VoiceEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                VoiceEvent::StateChanged {
                    channel: 0,
                    state: SessionState::Recognizing
                },
                VoiceEvent::RecognitionError {
                    channel: 0,
                    reason: "timeout".into()
                },
                VoiceEvent::StateChanged {
                    channel: 0,
                    state: SessionState::None
                },
            ]
        );
    }

    #[test]
    fn concurrent_flushes_deliver_each_event_once() {
        let (tx, rx) = mpsc::channel::<VoiceEvent>();
        let notifier = Arc::new(EventNotifier::new(Arc::new(tx)));

        let workers: Vec<_> = (0..4u32)
            .map(|channel| {
                let notifier = Arc::clone(&notifier);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        notifier.enqueue(channel, Notification::RecognitionResult("x".into()));
                        notifier.flush();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        notifier.flush();

        assert_eq!(rx.try_iter().count(), 200);
    }

    /// Sink that reacts to RECORDING by queueing NONE and flushing again,
    /// the way a session call made from inside a callback does.
    struct ReentrantSink {
        notifier: OnceLock<Weak<EventNotifier>>,
        events: mpsc::Sender<VoiceEvent>,
    }

    impl VoiceEventSink for ReentrantSink {
        fn on_state_changed(&self, channel: u32, state: SessionState) {
            self.events.on_state_changed(channel, state);
            if state == SessionState::Recording {
                if let Some(notifier) = self.notifier.get().and_then(Weak::upgrade) {
                    notifier.enqueue(channel, Notification::StateChanged(SessionState::None));
                    notifier.flush();
                }
            }
        }

        fn on_recognition_result(&self, channel: u32, transcript: &str) {
            self.events.on_recognition_result(channel, transcript);
        }

        fn on_recognition_error(&self, channel: u32, error: &VoiceError) {
            self.events.on_recognition_error(channel, error);
        }
    }

    #[test]
    fn flush_from_inside_sink_does_not_block() {
        let (tx, rx) = mpsc::channel::<VoiceEvent>();
        let sink = Arc::new(ReentrantSink {
            notifier: OnceLock::new(),
            events: tx,
        });
        let notifier = Arc::new(EventNotifier::new(sink.clone()));
        let _ = sink.notifier.set(Arc::downgrade(&notifier));

        notifier.enqueue(2, Notification::StateChanged(SessionState::Recording));
        notifier.enqueue(2, Notification::RecognitionResult("after".into()));
        notifier.flush();

        let events: Vec<VoiceEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                VoiceEvent::StateChanged {
                    channel: 2,
                    state: SessionState::Recording
                },
                VoiceEvent::RecognitionResult {
                    channel: 2,
                    transcript: "after".into()
                },
                VoiceEvent::StateChanged {
                    channel: 2,
                    state: SessionState::None
                },
            ]
        );

        // the mark is released once the outer flush returns
        notifier.enqueue(2, Notification::StateChanged(SessionState::Recognizing));
        notifier.flush();
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn volume_is_delivered_immediately() {
        let (tx, rx) = mpsc::channel::<VoiceEvent>();
        let notifier = EventNotifier::new(Arc::new(tx));
        notifier.volume(3, 0.25);
        assert_eq!(
            rx.try_recv().unwrap(),
            VoiceEvent::VolumeChanged {
                channel: 3,
                level: 0.25
            }
        );
    }
}
