//! Recurrence management endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::{error_status, AppState};
use crate::recurring::RecurringSnapshot;

// GET /recurring
pub(crate) async fn list_recurring(
    State(engine): State<AppState>,
) -> Json<Vec<RecurringSnapshot>> {
    Json(engine.list_recurring().await)
}

// PATCH /recurring/{recurring_id}/enable
pub(crate) async fn enable(
    State(engine): State<AppState>,
    Path(recurring_id): Path<String>,
) -> Result<Json<RecurringSnapshot>, (StatusCode, String)> {
    engine
        .enable_recurring(&recurring_id)
        .await
        .map_err(error_status)?;
    snapshot_of(&engine, &recurring_id).await
}

// PATCH /recurring/{recurring_id}/disable
pub(crate) async fn disable(
    State(engine): State<AppState>,
    Path(recurring_id): Path<String>,
) -> Result<Json<RecurringSnapshot>, (StatusCode, String)> {
    engine
        .disable_recurring(&recurring_id)
        .await
        .map_err(error_status)?;
    snapshot_of(&engine, &recurring_id).await
}

async fn snapshot_of(
    engine: &AppState,
    recurring_id: &str,
) -> Result<Json<RecurringSnapshot>, (StatusCode, String)> {
    engine
        .get_recurring(recurring_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("'{recurring_id}' not found"),
            )
        })
}
