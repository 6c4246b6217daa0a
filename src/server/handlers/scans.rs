//! Scan submission and job status.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use super::super::auth::authorize;
use super::super::AppState;
use super::{error_response, unauthorized};
use crate::models::{NewScan, ScanEvent, ScannedUrl, SubmitAck};
use crate::repository::DbError;

/// Store a scanned URL and hand its event to the dispatcher.
///
/// Resubmitting the same URL for the same user returns the existing row
/// with `already_exists` set. It is dispatched again only when no job was
/// ever recorded for it, or when its job failed waiting for rendered
/// content and this submission carries a snapshot.
pub async fn submit_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if authorize(&headers, &state.ingest_secret).is_err() {
        return unauthorized();
    }

    let scan: NewScan = match serde_json::from_slice(&body) {
        Ok(scan) => scan,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("invalid body: {}", e)),
    };
    if let Err(reason) = scan.validate() {
        return error_response(StatusCode::BAD_REQUEST, &reason);
    }

    let (stored, created) = match state.scans.insert(&scan).await {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to store scan of {}: {}", scan.url, e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
        }
    };

    let (stored, dispatch) = if created {
        (stored, true)
    } else {
        match resubmission(&state, stored, &scan).await {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to reconcile resubmitted scan of {}: {}", scan.url, e);
                return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
            }
        }
    };

    let mut dispatched = false;
    if dispatch {
        dispatched = state.delivery.deliver(ScanEvent::insert(&stored)).await;
        if !dispatched {
            warn!(scanned_url_id = %stored.id, "Delivery worker stopped; scan not dispatched");
        }
    }

    Json(SubmitAck {
        scanned_url_id: stored.id,
        already_exists: !created,
        dispatched,
    })
    .into_response()
}

/// Decide whether an already stored scan needs another dispatch, attaching
/// the newly supplied snapshot first when it does.
async fn resubmission(
    state: &AppState,
    stored: ScannedUrl,
    scan: &NewScan,
) -> Result<(ScannedUrl, bool), DbError> {
    let dispatch = match state.jobs.get_by_scanned_url(&stored.id).await? {
        None => true,
        Some(job) => scan.html_snapshot.is_some() && job.awaits_snapshot(),
    };
    if !dispatch {
        return Ok((stored, false));
    }

    let snapshot = match scan.html_snapshot.as_deref() {
        Some(snapshot) if stored.html_snapshot.as_deref() != Some(snapshot) => snapshot,
        _ => return Ok((stored, true)),
    };

    info!(scanned_url_id = %stored.id, "Attaching snapshot from resubmission");
    match state.scans.attach_snapshot(&stored.id, snapshot).await? {
        Some(updated) => Ok((updated, true)),
        None => Ok((stored, true)),
    }
}

/// Job for a scanned URL.
pub async fn scan_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(scanned_url_id): Path<String>,
) -> Response {
    if authorize(&headers, &state.ingest_secret).is_err() {
        return unauthorized();
    }

    match state.jobs.get_by_scanned_url(&scanned_url_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
