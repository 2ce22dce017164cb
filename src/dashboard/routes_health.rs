//! # Health & Metrics Endpoints
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /healthz` | Liveness: the process is serving HTTP |
//! | `GET /readyz` | Readiness: database reachable within 2 s |
//! | `GET /metrics` | Prometheus scrape |
//!
//! Readiness also reports the outbox backlog so an operator can see stuck
//! sheet or email jobs without shelling into the database.

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn handler_healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 200 with the outbox summary when the database answers `SELECT 1` in
/// time, 503 otherwise.
pub async fn handler_readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::time::timeout(READY_TIMEOUT, state.db.health_check()).await {
        Ok(Ok(())) => {
            let outbox = state.db.outbox_summary().await.unwrap_or_default();
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "ok", "outbox": outbox})),
            )
        }
        Ok(Err(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "database unreachable"})),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "database timeout"})),
        ),
    }
}

/// Text exposition of the registry. Outbox gauges are refreshed by the
/// drain loop, not here.
pub async fn handler_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        state.prom_metrics.encode(),
    )
}
