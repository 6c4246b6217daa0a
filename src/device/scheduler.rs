//! Periodic, connectivity-gated sync runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::reconciler::{SyncReconciler, SyncReport};
use crate::repository::DbError;

/// Result of a single scheduler tick.
#[derive(Debug)]
pub enum Tick {
    /// A previous run was still in flight.
    SkippedOverlap,
    /// The server could not be reached; nothing was attempted.
    Offline,
    Ran(SyncReport),
}

impl Tick {
    fn succeeded(&self) -> bool {
        match self {
            Tick::SkippedOverlap => true,
            Tick::Offline => false,
            Tick::Ran(report) => report.is_success(),
        }
    }
}

/// Delay before the next run: the regular interval after success, or an
/// exponential backoff capped at `max_backoff` after consecutive failures.
pub fn next_delay(
    consecutive_failures: u32,
    interval: Duration,
    retry_base: Duration,
    max_backoff: Duration,
) -> Duration {
    if consecutive_failures == 0 {
        return interval;
    }
    let factor = 2u32.saturating_pow(consecutive_failures.saturating_sub(1).min(16));
    retry_base.saturating_mul(factor).min(max_backoff)
}

#[derive(Clone)]
pub struct SyncScheduler {
    reconciler: Arc<SyncReconciler>,
    running: Arc<Mutex<()>>,
    interval: Duration,
    retry_base: Duration,
    max_backoff: Duration,
}

impl SyncScheduler {
    pub fn new(reconciler: Arc<SyncReconciler>, interval: Duration, max_backoff: Duration) -> Self {
        Self {
            reconciler,
            running: Arc::new(Mutex::new(())),
            interval,
            retry_base: Duration::from_secs(30).min(interval),
            max_backoff: max_backoff.max(interval),
        }
    }

    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    /// Run one pass unless another is in flight or the server is unreachable.
    pub async fn tick(&self) -> Result<Tick, DbError> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Sync already running, skipping");
            return Ok(Tick::SkippedOverlap);
        };

        if !self.reconciler.submitter().is_reachable().await {
            debug!("Server unreachable, skipping sync");
            return Ok(Tick::Offline);
        }

        Ok(Tick::Ran(self.reconciler.run_once().await?))
    }

    /// Tick until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut failures: u32 = 0;

        info!("Sync scheduler started (interval: {}s)", self.interval.as_secs());

        loop {
            match self.tick().await {
                Ok(tick) if tick.succeeded() => failures = 0,
                Ok(tick) => {
                    failures = failures.saturating_add(1);
                    debug!(?tick, failures, "Sync did not complete");
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!("Sync failed: {}", e);
                }
            }

            let delay = next_delay(failures, self.interval, self.retry_base, self.max_backoff);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Sync scheduler stopping");
                    return;
                }
            }
        }
    }
}
