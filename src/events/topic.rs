//! # One topic: retained latest, subscriber slots, terminal flag.
//!
//! A topic is the unit of ordered fan-out. Each subscriber gets its own
//! bounded queue; delivery never blocks the publisher.
//!
//! ## Rules
//! - **Replay**: a new subscriber's first event is the retained latest.
//! - **Per-subscriber FIFO**: each subscriber sees events in publication order.
//! - **Overflow**: a full subscriber queue drops *that subscriber only*,
//!   flagged so its [`Subscription`] reports the drop; other subscribers and
//!   the publisher are unaffected.
//! - **Terminal**: `open → terminal`, one way. A terminal topic accepts no
//!   publications; subscribers drain their backlog and see end-of-stream.
//!   Late subscribers get the retained event and an immediate end.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::EngineError;
use crate::events::event::EngineEvent;

/// Per-subscriber delivery slot.
struct SubscriberSlot {
    tx: mpsc::Sender<Arc<EngineEvent>>,
    dropped: Arc<AtomicBool>,
}

struct TopicState {
    retained: Option<Arc<EngineEvent>>,
    subscribers: Vec<SubscriberSlot>,
    terminal: bool,
}

/// A named event stream with retained-latest replay.
pub(crate) struct Topic {
    name: String,
    buffer: usize,
    inner: Mutex<TopicState>,
}

impl Topic {
    pub(crate) fn new(name: String, buffer: usize) -> Self {
        Self {
            name,
            buffer: buffer.max(1),
            inner: Mutex::new(TopicState {
                retained: None,
                subscribers: Vec::new(),
                terminal: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TopicState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a subscriber, delivering the retained event first.
    ///
    /// On a terminal topic the subscription carries the retained event (if
    /// any) followed by an immediate end-of-stream.
    pub(crate) fn subscribe(&self) -> Subscription {
        let mut state = self.lock();
        let (tx, rx) = mpsc::channel(self.buffer);
        let dropped = Arc::new(AtomicBool::new(false));

        if let Some(retained) = &state.retained {
            // A fresh channel always has room for the replay frame.
            let _ = tx.try_send(Arc::clone(retained));
        }
        if !state.terminal {
            state.subscribers.push(SubscriberSlot {
                tx,
                dropped: Arc::clone(&dropped),
            });
        }

        Subscription { rx, dropped }
    }

    /// Publishes an event to all subscribers and replaces the retained latest.
    ///
    /// Returns `Err(TopicClosed)` when the topic is already terminal.
    pub(crate) fn publish(&self, event: Arc<EngineEvent>) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.terminal {
            return Err(EngineError::TopicClosed {
                topic: self.name.clone(),
            });
        }
        state.retained = Some(Arc::clone(&event));
        Self::deliver(&mut state, &self.name, event);
        Ok(())
    }

    /// Optionally publishes `final_event`, then marks the topic terminal.
    ///
    /// Idempotent: closing a terminal topic is a no-op.
    pub(crate) fn close(&self, final_event: Option<Arc<EngineEvent>>) {
        let mut state = self.lock();
        if state.terminal {
            return;
        }
        if let Some(event) = final_event {
            state.retained = Some(Arc::clone(&event));
            Self::deliver(&mut state, &self.name, event);
        }
        state.terminal = true;
        // Dropping the senders lets each receiver drain its backlog and then
        // observe a clean end-of-stream.
        state.subscribers.clear();
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.lock().terminal
    }

    /// Non-blocking delivery; a full slot is dropped with its flag set.
    fn deliver(state: &mut TopicState, name: &str, event: Arc<EngineEvent>) {
        state.subscribers.retain(|slot| {
            match slot.tx.try_send(Arc::clone(&event)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.dropped.store(true, Ordering::Release);
                    warn!(topic = name, "dropping slow subscriber: buffer full");
                    false
                }
                // Receiver went away (client disconnected); just forget it.
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// A subscriber's view of one topic.
///
/// Yields events in publication order, starting with the retained latest at
/// subscribe time. Ends cleanly when the topic closes and the backlog is
/// drained; ends with [`EngineError::Overflow`] when the bus dropped this
/// subscriber for falling behind.
pub struct Subscription {
    rx: mpsc::Receiver<Arc<EngineEvent>>,
    dropped: Arc<AtomicBool>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// `Ok(None)` signals a clean end-of-stream; `Err(Overflow)` signals that
    /// this subscriber was dropped for falling behind.
    pub async fn recv(&mut self) -> Result<Option<Arc<EngineEvent>>, EngineError> {
        match self.rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => {
                if self.dropped.load(Ordering::Acquire) {
                    Err(EngineError::Overflow)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Stream view for transport adapters (SSE). Overflow simply ends the
/// stream; transports express the drop as connection teardown.
impl Stream for Subscription {
    type Item = Arc<EngineEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
