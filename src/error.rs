//! # Error types used by the engine and task bodies.
//!
//! Two families:
//!
//! - [`EngineError`] — errors raised by the engine's programmatic surface.
//! - [`TaskFailure`] — the failure value a task body produces; it never
//!   propagates past the runner and is instead captured into the record's
//!   `error_*` fields and emitted as events.
//!
//! [`EngineError`] provides `as_label` for logs/metrics.

use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Nothing a caller can do through this API crashes the engine; these are
/// all synchronous, local signals.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown `task_id` or `recurring_id` on an operation that requires existence.
    #[error("'{id}' not found")]
    NotFound {
        /// The missing identifier.
        id: String,
    },

    /// Malformed input: bad cron expression, non-positive `max_concurrent`.
    #[error("bad request: {reason}")]
    BadRequest {
        /// Human-readable description of what was rejected.
        reason: String,
    },

    /// Submissions/subscriptions rejected after `stop()`.
    #[error("engine is shutting down")]
    ShutdownInProgress,

    /// Publish attempted on a topic that is already terminal.
    #[error("topic '{topic}' is closed")]
    TopicClosed {
        /// Topic name.
        topic: String,
    },

    /// A subscriber's buffer filled and it was dropped by the bus.
    #[error("subscriber dropped: buffer overflow")]
    Overflow,
}

impl EngineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::BadRequest { .. } => "bad_request",
            EngineError::ShutdownInProgress => "shutdown_in_progress",
            EngineError::TopicClosed { .. } => "topic_closed",
            EngineError::Overflow => "overflow",
        }
    }

    pub(crate) fn not_found(id: impl Into<String>) -> Self {
        EngineError::NotFound { id: id.into() }
    }

    pub(crate) fn bad_request(reason: impl Into<String>) -> Self {
        EngineError::BadRequest {
            reason: reason.into(),
        }
    }
}

/// Failure value produced by a task body.
///
/// Captured verbatim into the record's `error_type`, `error_message` and
/// `error_traceback` fields when a task ends in `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Kind name of the failure (`"cancelled"`, `"panic"`, or body-defined).
    pub kind: String,
    /// Human-readable description.
    pub message: String,
    /// Formatted stack/context string.
    pub trace: String,
}

impl TaskFailure {
    /// Creates a failure with the given kind and message; the trace defaults
    /// to `"<kind>: <message>"` when the body has nothing richer to attach.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = kind.into();
        let message = message.into();
        let trace = format!("{kind}: {message}");
        Self {
            kind,
            message,
            trace,
        }
    }

    /// Attaches a caller-supplied traceback string.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// The terminal failure recorded for a cancelled task.
    pub fn cancelled() -> Self {
        TaskFailure::new("cancelled", "task was cancelled")
    }

    /// True when this failure records a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == "cancelled"
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskFailure {}
