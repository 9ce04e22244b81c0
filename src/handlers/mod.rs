pub mod sends;
pub mod webhook;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::AppState;

/// 503 only when a critical dependency is down; a degraded service still
/// answers 200.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.run().await;
    let status_code = if report.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(report))
}
