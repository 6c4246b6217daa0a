use axum::{http::StatusCode, response::IntoResponse};

/// Liveness probe, also used by devices as their connectivity check.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}
