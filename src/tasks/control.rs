//! # Mutation handle handed to running bodies.
//!
//! [`TaskControl`] is the only way a body touches its record. Setters take
//! the record lock briefly and never hold it across an await point; the
//! runner's monitor loop picks the mutations up and publishes coalesced
//! snapshots, so bodies can update progress as often as they like without
//! flooding subscribers.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::TaskFailure;
use crate::tasks::body::BodyRef;
use crate::tasks::record::{TaskRecord, TaskSnapshot};

/// Engine-internal shared state of one submitted task.
pub(crate) struct TaskShared {
    pub(crate) record: Mutex<TaskRecord>,
    pub(crate) body: BodyRef,
    pub(crate) cancel: CancellationToken,
}

impl TaskShared {
    pub(crate) fn new(record: TaskRecord, body: BodyRef, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(record),
            body,
            cancel,
        })
    }

    /// Locks the record, recovering from a poisoned lock (a body may panic
    /// between mutations; the record itself stays consistent because every
    /// setter completes its write before releasing).
    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        self.lock().snapshot()
    }
}

/// Handle a body uses to mutate its own record.
#[derive(Clone)]
pub struct TaskControl {
    shared: Arc<TaskShared>,
}

impl TaskControl {
    pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    /// The id of the task this handle controls.
    pub fn task_id(&self) -> String {
        self.shared.lock().task_id.clone()
    }

    /// Sets progress, clamped to −1..=100 (−1 = indeterminate).
    pub fn set_progress(&self, progress: i32) {
        self.shared.lock().progress = progress.clamp(-1, 100);
    }

    /// Current progress value.
    pub fn progress(&self) -> i32 {
        self.shared.lock().progress
    }

    /// Sets the display heading.
    pub fn set_heading(&self, heading: impl Into<String>) {
        self.shared.lock().heading = Some(heading.into());
    }

    /// Sets the display body text.
    pub fn set_body(&self, body: impl Into<String>) {
        self.shared.lock().body = Some(body.into());
    }

    /// Sets the display image reference.
    pub fn set_img(&self, img: impl Into<String>) {
        self.shared.lock().img = Some(img.into());
    }

    /// Stores an opaque result value on the record.
    pub fn set_results(&self, results: serde_json::Value) {
        self.shared.lock().results = Some(results);
    }

    /// Explicitly marks the task failed.
    ///
    /// The engine will not overwrite this with `done` when the body later
    /// returns `Ok`. Timestamps are still stamped by the engine.
    pub fn fail(&self, kind: impl Into<String>, message: impl Into<String>) {
        let failure = TaskFailure::new(kind, message);
        self.shared.lock().fail_with(&failure);
    }

    /// Current snapshot of the record.
    pub fn snapshot(&self) -> TaskSnapshot {
        self.shared.snapshot()
    }
}
