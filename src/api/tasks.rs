//! Task endpoints: listing, streams, deletion, search, demo factories.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::api::{error_status, AppState};
use crate::tasks::{CpuDemoBody, IoDemoBody, TaskSnapshot};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

// GET /queue
pub(crate) async fn get_queue(State(engine): State<AppState>) -> Json<Vec<TaskSnapshot>> {
    Json(engine.list().await)
}

// GET /queue/stream
pub(crate) async fn stream_queue(
    State(engine): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let subscription = engine.subscribe_queue().map_err(error_status)?;
    let initial = json!({"type": "queue_updated", "tasks": engine.list().await});

    let stream = futures::stream::once(async move {
        Ok::<_, Infallible>(Event::default().data(initial.to_string()))
    })
    .chain(subscription.map(|ev| Ok(Event::default().data(ev.to_wire_json().to_string()))));

    Ok(Sse::new(stream).keep_alive(keepalive()))
}

// GET /{task_id}/stream
pub(crate) async fn stream_task(
    State(engine): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let subscription = engine.subscribe_task(&task_id).await.map_err(error_status)?;
    let stream =
        subscription.map(|ev| Ok(Event::default().data(ev.to_wire_json().to_string())));
    Ok(Sse::new(stream).keep_alive(keepalive()))
}

// DELETE /{task_id}
pub(crate) async fn delete_task(
    State(engine): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    engine.delete(&task_id).await.map_err(error_status)?;
    Ok(Json(json!({"task_id": task_id, "message": "task removed"})))
}

// DELETE /completed
pub(crate) async fn delete_completed(State(engine): State<AppState>) -> Json<Value> {
    let (deleted_count, failed_count) = engine.delete_completed().await;
    Json(json!({
        "deleted_count": deleted_count,
        "failed_count": failed_count,
        "message": format!("removed {} completed tasks", deleted_count + failed_count),
    }))
}

// POST /search
pub(crate) async fn search(
    State(engine): State<AppState>,
    Json(criteria): Json<serde_json::Map<String, Value>>,
) -> Json<Value> {
    let task_ids = engine.search(&criteria).await;
    Json(json!({ "task_ids": task_ids }))
}

// POST /example_cpu_task
pub(crate) async fn example_cpu_task(
    State(engine): State<AppState>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let task_id = engine
        .submit(Arc::new(CpuDemoBody::default()))
        .await
        .map_err(error_status)?;
    Ok(Json(json!({ "task_id": task_id })))
}

// POST /example_io_task
pub(crate) async fn example_io_task(
    State(engine): State<AppState>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let task_id = engine
        .submit(Arc::new(IoDemoBody::default()))
        .await
        .map_err(error_status)?;
    Ok(Json(json!({ "task_id": task_id })))
}

fn keepalive() -> KeepAlive {
    KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keepalive")
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::router;
    use crate::config::Config;
    use crate::core::EngineBuilder;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queue_starts_empty_and_delete_unknown_is_404() {
        let engine = EngineBuilder::new(Config::default()).build();
        engine.start().await;
        let app = router(engine.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));

        let response = app
            .oneshot(
                Request::delete("/no-such-task")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn search_round_trips_task_ids() {
        let engine = EngineBuilder::new(Config::default()).build();
        engine.start().await;
        let id = engine
            .submit(crate::tasks::BodyFn::arc(
                "probe",
                "default",
                |_ctl: crate::tasks::TaskControl, _ctx: tokio_util::sync::CancellationToken| async {
                Ok(())
            }))
            .await
            .unwrap();

        let app = router(engine.clone());
        let request = Request::post("/search")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"task_type": "probe"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "task_ids": [id] })
        );
        engine.stop().await;
    }
}
