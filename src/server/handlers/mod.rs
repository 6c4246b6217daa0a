//! HTTP request handlers.

mod events;
mod health;
mod scans;

pub use events::scan_event;
pub use health::health;
pub use scans::{scan_job, submit_scan};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::pipeline::IngestError;

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn unauthorized() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        &IngestError::Authorization.to_string(),
    )
}
