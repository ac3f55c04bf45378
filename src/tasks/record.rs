//! # Task record and its externally visible snapshot.
//!
//! [`TaskRecord`] is the mutable state of one unit of work. The engine owns
//! it; the running body mutates it through
//! [`TaskControl`](crate::tasks::TaskControl). [`TaskSnapshot`] is the
//! serializable projection published on the task's topic and over the wire.
//!
//! ## Rules
//! - `status` moves `queued → running → done|failed`; no transition skips
//!   `running`.
//! - `started_at`/`completed_at` are stamped once at the corresponding
//!   transition and never mutated afterwards.
//! - All three `error_*` fields are populated iff `status == failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskFailure;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted and waiting in the intake queue.
    Queued,
    /// A dispatcher is executing the body.
    Running,
    /// Completed successfully.
    Done,
    /// Terminal failure (body error, panic, or cancellation).
    Failed,
}

impl TaskStatus {
    /// True for `done` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// Mutable state of one unit of work.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Unique opaque id (UUID-shaped).
    pub task_id: String,
    /// Task or recurrence that spawned this; `None` for direct submissions.
    pub parent_id: Option<String>,
    /// Kind name of the body, fixed at submission.
    pub task_type: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Progress in −1..=100; −1 means indeterminate.
    pub progress: i32,
    /// Concurrency class the dispatcher acquires before running the body.
    pub semaphore_name: String,
    /// Optional display image, mutable by the body.
    pub img: Option<String>,
    /// Optional display heading, mutable by the body.
    pub heading: Option<String>,
    /// Optional display body text, mutable by the body.
    pub body: Option<String>,
    /// Stamped when the task transitions to `running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Stamped when the task reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure kind name; set only on `failed`.
    pub error_type: Option<String>,
    /// Human-readable failure description; set only on `failed`.
    pub error_message: Option<String>,
    /// Formatted stack/context string; set only on `failed`.
    pub error_traceback: Option<String>,
    /// Opaque value produced by the body.
    pub results: Option<serde_json::Value>,
}

impl TaskRecord {
    /// Creates a fresh `queued` record for a body of the given kind and
    /// semaphore class.
    pub fn new(task_type: impl Into<String>, semaphore_name: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            parent_id: None,
            task_type: task_type.into(),
            status: TaskStatus::Queued,
            progress: 0,
            semaphore_name: semaphore_name.into(),
            img: None,
            heading: None,
            body: None,
            started_at: None,
            completed_at: None,
            error_type: None,
            error_message: None,
            error_traceback: None,
            results: None,
        }
    }

    /// Marks the record failed, capturing the failure into the `error_*`
    /// fields. Does not stamp `completed_at`; the runner owns timestamps.
    pub(crate) fn fail_with(&mut self, failure: &TaskFailure) {
        self.status = TaskStatus::Failed;
        self.error_type = Some(failure.kind.clone());
        self.error_message = Some(failure.message.clone());
        self.error_traceback = Some(failure.trace.clone());
    }

    /// Projects the externally visible fields.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            parent_id: self.parent_id.clone(),
            task_type: self.task_type.clone(),
            status: self.status,
            progress: self.progress,
            img: self.img.clone(),
            heading: self.heading.clone(),
            body: self.body.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_type: self.error_type.clone(),
            error_message: self.error_message.clone(),
            error_traceback: self.error_traceback.clone(),
        }
    }

    /// JSON document the store's attribute search matches against: the
    /// snapshot fields plus `semaphore_name` and `results`.
    pub(crate) fn search_doc(&self) -> serde_json::Value {
        let mut doc = serde_json::to_value(self.snapshot()).unwrap_or_default();
        if let Some(map) = doc.as_object_mut() {
            map.insert(
                "semaphore_name".to_string(),
                serde_json::Value::String(self.semaphore_name.clone()),
            );
            map.insert(
                "results".to_string(),
                self.results.clone().unwrap_or(serde_json::Value::Null),
            );
        }
        doc
    }
}

/// Externally visible fields of a [`TaskRecord`] at a point in time.
///
/// Timestamps serialize as ISO-8601 strings or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub parent_id: Option<String>,
    pub task_type: String,
    pub status: TaskStatus,
    pub progress: i32,
    pub img: Option<String>,
    pub heading: Option<String>,
    pub body: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
}

impl TaskSnapshot {
    /// True once the snapshot shows a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
