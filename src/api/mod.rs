//! HTTP/SSE projection of the engine.
//!
//! The engine itself is transport-agnostic; this module is the collaborator
//! layer that mounts it under an axum router (commonly nested at
//! `/api/tasks`):
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /queue` | JSON array of current task snapshots |
//! | `GET /queue/stream` | SSE of queue-topic events |
//! | `GET /{task_id}/stream` | SSE of task snapshots, ends after terminal |
//! | `DELETE /{task_id}` | remove one task (404 if unknown) |
//! | `DELETE /completed` | remove all terminal tasks |
//! | `POST /search` | attribute-equality search |
//! | `GET /recurring` | list recurrences |
//! | `PATCH /recurring/{id}/enable` · `/disable` | toggle spawning |
//! | `POST /example_cpu_task` · `/example_io_task` | submit demo bodies |
//!
//! SSE framing is one `data: <json>` frame per event with a `: keepalive`
//! comment every 10 seconds.

mod recurring;
mod tasks;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::core::TaskEngine;
use crate::error::EngineError;

pub(crate) type AppState = Arc<TaskEngine>;

/// Builds the task-management router over a shared engine.
///
/// The host owns the engine lifecycle: start it at boot, stop it at
/// shutdown, and nest this router wherever it likes.
pub fn router(engine: Arc<TaskEngine>) -> Router {
    Router::new()
        .route("/queue", get(tasks::get_queue))
        .route("/queue/stream", get(tasks::stream_queue))
        .route("/{task_id}/stream", get(tasks::stream_task))
        .route("/{task_id}", delete(tasks::delete_task))
        .route("/completed", delete(tasks::delete_completed))
        .route("/search", post(tasks::search))
        .route("/recurring", get(recurring::list_recurring))
        .route("/recurring/{recurring_id}/enable", patch(recurring::enable))
        .route("/recurring/{recurring_id}/disable", patch(recurring::disable))
        .route("/example_cpu_task", post(tasks::example_cpu_task))
        .route("/example_io_task", post(tasks::example_io_task))
        .with_state(engine)
}

/// Projects engine errors onto HTTP status codes.
pub(crate) fn error_status(err: EngineError) -> (StatusCode, String) {
    let status = match &err {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        EngineError::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::TopicClosed { .. } | EngineError::Overflow => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}
