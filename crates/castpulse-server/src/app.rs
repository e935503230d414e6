use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use castpulse_core::config::CastpulseConfig;
use castpulse_core::metrics;
use castpulse_store::models::Thread;
use castpulse_store::Store;
use castpulse_tasks::TaskQueue;

pub struct AppState {
    pub store: Store,
    pub queue: TaskQueue,
    pub config: Arc<CastpulseConfig>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(probe))
        .route("/ready", get(probe))
        .route("/metrics", get(metrics_text))
        .route("/threads", post(create_thread))
        .route("/threads/{id}", get(get_thread))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn probe() -> &'static str {
    "ok"
}

async fn metrics_text() -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct CreateThreadRequest {
    reddit_id: String,
    subreddit: String,
}

/// The thin boundary: validate and enqueue; the ingestion queue does
/// the rest.
async fn create_thread(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateThreadRequest>,
) -> Response {
    if request.reddit_id.trim().is_empty() || request.subreddit.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "reddit_id and subreddit are required"})),
        )
            .into_response();
    }

    let enqueued = state.queue.enqueue(
        "ingest_thread",
        json!({
            "reddit_id": request.reddit_id,
            "subreddit": request.subreddit,
        }),
        0,
    );
    match enqueued {
        Ok(task) => {
            info!(reddit_id = %request.reddit_id, task_id = %task.id, "ingest queued");
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "queued": true,
                    "task_id": task.id,
                    "reddit_id": request.reddit_id,
                })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn get_thread(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.store.thread_by_id(id) {
        Ok(Some(thread)) => (StatusCode::OK, Json(thread_json(&thread))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "thread not found"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

fn thread_json(thread: &Thread) -> serde_json::Value {
    json!({
        "id": thread.id,
        "reddit_id": thread.reddit_id,
        "subreddit": thread.subreddit,
        "title": thread.title,
        "url": thread.url,
        "air_time_utc": thread.air_time_utc,
        "created_utc": thread.created_utc,
        "status": thread.status.as_str(),
        "total_comments": thread.total_comments,
        "synopsis": thread.synopsis,
        "last_polled_at": thread.last_polled_at,
        "latest_comment_utc": thread.latest_comment_utc,
        "poll_interval_seconds": thread.poll_interval_seconds,
    })
}
