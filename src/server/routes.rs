//! Router configuration for the ingestion server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Device submission and status
        .route("/api/scans", post(handlers::submit_scan))
        .route("/api/scans/:scanned_url_id/job", get(handlers::scan_job))
        // Event delivery
        .route("/hooks/scan-event", post(handlers::scan_event))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
