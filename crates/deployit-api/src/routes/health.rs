//! Health check endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Json<Value> {
    let poll = state.poll_settings.current();
    Json(json!({
        "status": "ready",
        "deployers": state.orchestrator.registry().kinds(),
        "poll_interval_ms": poll.interval.as_millis() as u64,
        "poll_max_wait_ms": poll.max_wait.as_millis() as u64,
    }))
}
