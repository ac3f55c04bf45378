//! # Event bus: named topics with fan-out and replay.
//!
//! [`EventBus`] owns every [`Topic`] in the engine, keyed by name. Topics
//! are created lazily on first use and live until the record they describe
//! leaves the store (or the engine stops), so subscribers can join at any
//! time — including after the task completed — and still receive the
//! retained final snapshot.
//!
//! ## Rules
//! - `publish` holds only the target topic's lock, never a caller's.
//! - Publishing on a terminal topic is a no-op with `Err(TopicClosed)`.
//! - `close` is idempotent; `remove` detaches remaining subscribers.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::EngineError;
use crate::events::event::EngineEvent;
use crate::events::topic::{Subscription, Topic};

/// Registry of named topics.
pub struct EventBus {
    topics: DashMap<String, Arc<Topic>>,
    buffer: usize,
}

impl EventBus {
    /// Creates a bus whose subscribers get bounded queues of `buffer` slots.
    pub fn new(buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name.to_string(), self.buffer)))
            .clone()
    }

    /// Subscribes to `name`, creating the topic if needed.
    ///
    /// The subscription starts with the topic's retained latest event and is
    /// finite iff the topic is (or becomes) terminal.
    pub fn subscribe(&self, name: &str) -> Subscription {
        self.topic(name).subscribe()
    }

    /// Publishes `event` to every current subscriber of `name` and replaces
    /// the topic's retained latest.
    pub fn publish(&self, name: &str, event: EngineEvent) -> Result<(), EngineError> {
        self.topic(name).publish(Arc::new(event))
    }

    /// Optionally publishes `final_event`, then marks `name` terminal.
    pub fn close(&self, name: &str, final_event: Option<EngineEvent>) {
        self.topic(name).close(final_event.map(Arc::new));
    }

    /// True when the topic exists and is terminal.
    pub fn is_terminal(&self, name: &str) -> bool {
        self.topics
            .get(name)
            .map(|topic| topic.is_terminal())
            .unwrap_or(false)
    }

    /// Forgets a topic entirely. Remaining subscribers observe end-of-stream
    /// once they drain their backlog.
    pub fn remove(&self, name: &str) {
        if let Some((_, topic)) = self.topics.remove(name) {
            topic.close(None);
        }
    }

    /// Names of topics that are still open. Used at shutdown to force every
    /// stream to a terminal close.
    pub fn open_topics(&self) -> Vec<String> {
        self.topics
            .iter()
            .filter(|entry| !entry.value().is_terminal())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::QueueEvent;

    fn ev(id: &str) -> EngineEvent {
        EngineEvent::Queue(QueueEvent::TaskRemoved {
            task_id: id.to_string(),
        })
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = EventBus::new(16);
        let mut sub_a = bus.subscribe("a");
        let _sub_b = bus.subscribe("b");

        bus.publish("a", ev("only-a")).unwrap();
        let got = sub_a.recv().await.unwrap().unwrap();
        assert_eq!(got.as_ref(), &ev("only-a"));
    }

    #[tokio::test]
    async fn remove_ends_remaining_subscribers() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("gone");
        bus.remove("gone");
        assert!(sub.recv().await.unwrap().is_none());
        assert!(!bus.is_terminal("gone"));
    }

    #[tokio::test]
    async fn open_topics_excludes_closed() {
        let bus = EventBus::new(16);
        let _a = bus.subscribe("open");
        bus.publish("open", ev("x")).unwrap();
        bus.close("closed", None);

        let open = bus.open_topics();
        assert!(open.contains(&"open".to_string()));
        assert!(!open.contains(&"closed".to_string()));
    }
}
