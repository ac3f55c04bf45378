//! Event fabric: topics, the bus, and the event model.
//!
//! Every task owns one topic (`task/<task_id>`) carrying full
//! [`TaskSnapshot`](crate::tasks::TaskSnapshot) frames; one process-wide
//! queue topic carries [`QueueEvent`]s. Topics retain their latest event for
//! replay to late subscribers and end with a terminal close.
//!
//! - **event.rs**: [`EngineEvent`] / [`QueueEvent`] payloads
//! - **topic.rs**: one topic's retained state, subscriber slots, [`Subscription`]
//! - **bus.rs**: [`EventBus`] — named topics with subscribe/publish/close
//!
//! See `core/mod.rs` for who publishes and who consumes.

mod bus;
mod event;
mod topic;

pub use bus::EventBus;
pub use event::{EngineEvent, QueueEvent};
pub use topic::Subscription;

/// Name of the process-wide queue topic.
pub const QUEUE_TOPIC: &str = "queue";

/// Topic name for one task's update stream.
pub fn task_topic(task_id: &str) -> String {
    format!("task/{task_id}")
}
