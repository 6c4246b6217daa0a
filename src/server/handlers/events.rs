//! Scan-event entry point for external event delivery.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use super::super::auth::authorize;
use super::super::AppState;
use super::unauthorized;
use crate::models::ScanEvent;
use crate::pipeline::{Ack, IngestError};

/// Handle one delivered scan event.
///
/// Everything except an authorization failure or a retryable
/// infrastructure failure is acknowledged with 200, including bodies that
/// do not parse, so the event source never redelivers bad data.
pub async fn scan_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = authorize(&headers, &state.ingest_secret) {
        warn!("Rejected scan event: {}", e);
        return unauthorized();
    }

    let ack = match serde_json::from_slice::<ScanEvent>(&body) {
        Ok(event) => state.dispatcher.handle(&event).await,
        Err(e) => {
            let err = IngestError::Validation(format!("unreadable body: {}", e));
            warn!("Ignoring scan event: {}", err);
            Ack::Ignored {
                reason: err.to_string(),
            }
        }
    };

    let status = if ack.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(ack)).into_response()
}
