//! # Event payloads published on topics.
//!
//! Task topics carry full record snapshots; the queue topic carries tagged
//! membership events. Both project onto the wire as single JSON objects:
//! snapshots serialize bare, queue events serialize with a `type` tag
//! (`task_added`, `task_removed`, `queue_updated`).

use serde::Serialize;

use crate::tasks::TaskSnapshot;

/// Membership events on the queue topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A task entered the store and intake queue.
    TaskAdded {
        /// Snapshot at admission time.
        task: TaskSnapshot,
    },
    /// A task left the store (explicit delete or pruning).
    TaskRemoved {
        /// Id of the removed task.
        task_id: String,
    },
    /// Generic membership-changed signal.
    QueueUpdated,
}

/// Any event the bus can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Full snapshot on a task topic.
    Task(TaskSnapshot),
    /// Membership event on the queue topic.
    Queue(QueueEvent),
}

impl EngineEvent {
    /// The snapshot, when this is a task-topic event.
    pub fn task_snapshot(&self) -> Option<&TaskSnapshot> {
        match self {
            EngineEvent::Task(snap) => Some(snap),
            EngineEvent::Queue(_) => None,
        }
    }

    /// The queue event, when this is a queue-topic event.
    pub fn queue_event(&self) -> Option<&QueueEvent> {
        match self {
            EngineEvent::Queue(ev) => Some(ev),
            EngineEvent::Task(_) => None,
        }
    }

    /// Wire projection: bare snapshot for task events, `type`-tagged object
    /// for queue events.
    pub fn to_wire_json(&self) -> serde_json::Value {
        match self {
            EngineEvent::Task(snap) => serde_json::to_value(snap).unwrap_or_default(),
            EngineEvent::Queue(ev) => serde_json::to_value(ev).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskRecord;

    #[test]
    fn queue_events_tag_with_type() {
        let added = QueueEvent::TaskAdded {
            task: TaskRecord::new("DemoTask", "default").snapshot(),
        };
        let json = serde_json::to_value(&added).unwrap();
        assert_eq!(json["type"], "task_added");
        assert_eq!(json["task"]["task_type"], "DemoTask");

        let removed = QueueEvent::TaskRemoved {
            task_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&removed).unwrap();
        assert_eq!(json["type"], "task_removed");
        assert_eq!(json["task_id"], "abc");

        assert_eq!(
            serde_json::to_value(&QueueEvent::QueueUpdated).unwrap()["type"],
            "queue_updated"
        );
    }

    #[test]
    fn task_events_project_as_bare_snapshots() {
        let ev = EngineEvent::Task(TaskRecord::new("DemoTask", "default").snapshot());
        let json = ev.to_wire_json();
        assert!(json.get("type").is_none());
        assert_eq!(json["status"], "queued");
    }
}
