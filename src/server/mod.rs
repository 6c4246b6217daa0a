//! Ingestion server.
//!
//! Accepts scan submissions from devices, delivers the resulting scan
//! events to the dispatcher, and exposes an endpoint for externally
//! delivered events:
//! - `POST /api/scans` stores a scan and queues its event
//! - `POST /hooks/scan-event` runs one event through the dispatcher
//! - `GET /api/scans/:id/job` reports the job for a scan

mod auth;
mod handlers;
mod routes;

pub use auth::INGEST_SECRET_HEADER;
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use crate::config::Settings;
use crate::fetch::{BrowserHandle, FetchError};
use crate::pipeline::{spawn_delivery_worker, DeliveryQueue, Dispatcher, PersistenceWriter};
use crate::repository::{DbContext, JobLedger, ScanRepository};

/// Base delay before an event asking for retry is redelivered.
const REDELIVERY_DELAY: Duration = Duration::from_secs(5);

/// How long in-flight deliveries may run after the listener stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the ingestion server.
#[derive(Clone)]
pub struct AppState {
    pub scans: Arc<ScanRepository>,
    pub jobs: Arc<JobLedger>,
    pub dispatcher: Dispatcher,
    pub delivery: DeliveryQueue,
    pub ingest_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        ctx: &DbContext,
        dispatcher: Dispatcher,
        delivery: DeliveryQueue,
        ingest_secret: &str,
    ) -> Self {
        Self {
            scans: Arc::new(ctx.scans()),
            jobs: Arc::new(ctx.jobs()),
            dispatcher,
            delivery,
            ingest_secret: Arc::from(ingest_secret),
        }
    }
}

/// Wire the dispatcher for `ctx` from settings.
pub fn build_dispatcher(
    settings: &Settings,
    ctx: &DbContext,
    browser: Arc<BrowserHandle>,
) -> Result<Dispatcher, FetchError> {
    let parsers = settings.parser_set(browser)?;
    Ok(Dispatcher::new(
        ctx.jobs(),
        Arc::new(settings.registry()),
        Arc::new(parsers),
        PersistenceWriter::new(Arc::new(ctx.receipts())),
    )
    .with_max_attempts(settings.max_attempts))
}

/// Start the ingestion server and run until interrupted.
pub async fn serve(settings: &Settings, bind: &str) -> anyhow::Result<()> {
    let secret = settings
        .server
        .ingest_secret
        .clone()
        .filter(|s| !s.trim().is_empty())
        .context(
            "No ingest secret configured (set server.ingest_secret or RECEIPTSCAN_INGEST_SECRET)",
        )?;

    settings.ensure_directories()?;
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    let browser = Arc::new(settings.browser());
    let dispatcher = build_dispatcher(settings, &ctx, browser.clone())?;
    let (delivery, worker) = spawn_delivery_worker(dispatcher.clone(), REDELIVERY_DELAY);

    let app = create_router(AppState::new(&ctx, dispatcher, delivery, &secret));

    let addr: SocketAddr = bind.parse()?;
    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last delivery sender; the worker exits once drained.
    if tokio::time::timeout(DRAIN_TIMEOUT, worker).await.is_err() {
        warn!("Delivery worker still busy after {:?}", DRAIN_TIMEOUT);
    }
    browser.shutdown().await;
    info!("Server shut down");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
