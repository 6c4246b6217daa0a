//! Drains the local scan queue against the ingestion server.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::capture::{deliver_pending, Delivery};
use super::client::ScanSubmitter;
use crate::parsers::ParserRegistry;
use crate::repository::{DbError, PendingScanQueue};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub delivered: usize,
    pub failed: usize,
    /// Entries without a signed-in user.
    pub deferred: usize,
    /// Entries that need a device-rendered snapshot.
    pub awaiting_render: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Any failed submission fails the whole pass, so the scheduler backs off.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn remaining(&self) -> usize {
        self.failed + self.deferred + self.awaiting_render
    }
}

pub struct SyncReconciler {
    queue: PendingScanQueue,
    submitter: Arc<dyn ScanSubmitter>,
    registry: Arc<ParserRegistry>,
}

impl SyncReconciler {
    pub fn new(
        queue: PendingScanQueue,
        submitter: Arc<dyn ScanSubmitter>,
        registry: Arc<ParserRegistry>,
    ) -> Self {
        Self {
            queue,
            submitter,
            registry,
        }
    }

    pub fn submitter(&self) -> &dyn ScanSubmitter {
        self.submitter.as_ref()
    }

    /// Attempt every queued entry once, oldest first.
    ///
    /// Successful entries are removed immediately and stay removed even when
    /// other entries fail.
    pub async fn run_once(&self) -> Result<SyncReport, DbError> {
        let pending = self.queue.list().await?;
        let mut report = SyncReport::default();

        for scan in &pending {
            let delivery =
                deliver_pending(&self.queue, self.submitter.as_ref(), &self.registry, scan).await?;
            match delivery {
                Delivery::Delivered(_) => report.delivered += 1,
                Delivery::NoUser => report.deferred += 1,
                Delivery::AwaitingRender => report.awaiting_render += 1,
                Delivery::Failed(e) => {
                    warn!("Failed to deliver {}: {}", scan.url, e);
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", scan.url, e));
                }
            }
        }

        if !pending.is_empty() {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                deferred = report.deferred,
                awaiting_render = report.awaiting_render,
                "Sync pass finished"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::capture::tests::{queue, FakeSubmitter};
    use crate::device::IngestClient;
    use crate::models::CapturedScan;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn enqueue(queue: &PendingScanQueue, url: &str, user: Option<&str>) {
        queue
            .enqueue(&CapturedScan::new(url, user.map(str::to_string)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mixed_batch_keeps_failures_and_reports_failure() {
        let (queue, _dir) = queue().await;
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/scans"))
            .and(body_partial_json(serde_json::json!({"url": "https://e-apodeixi.gr/r/2"})))
            .respond_with(ResponseTemplate::new(500).set_body_string("database is locked"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/scans"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "scanned_url_id": "x",
                "already_exists": false
            })))
            .expect(2)
            .mount(&server)
            .await;

        for n in 1..=3 {
            enqueue(&queue, &format!("https://e-apodeixi.gr/r/{}", n), Some("alice")).await;
        }

        let client = IngestClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let reconciler = SyncReconciler::new(
            queue.clone(),
            Arc::new(client),
            Arc::new(ParserRegistry::builtin()),
        );

        let report = reconciler.run_once().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.is_success());
        let left = queue.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].url, "https://e-apodeixi.gr/r/2");
    }

    #[tokio::test]
    async fn test_skips_anonymous_and_unrendered_entries() {
        let (queue, _dir) = queue().await;
        enqueue(&queue, "https://e-apodeixi.gr/r/1", None).await;
        enqueue(&queue, "https://epsilon-einvoice.gr/v/2", Some("alice")).await;
        enqueue(&queue, "https://e-apodeixi.gr/r/3", Some("alice")).await;

        let submitter = Arc::new(FakeSubmitter::default());
        let reconciler = SyncReconciler::new(
            queue.clone(),
            submitter.clone(),
            Arc::new(ParserRegistry::builtin()),
        );

        let report = reconciler.run_once().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.delivered, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.awaiting_render, 1);
        assert_eq!(report.remaining(), 2);
        assert_eq!(queue.count().await.unwrap(), 2);

        // Signing in later lets the anonymous entry through
        enqueue(&queue, "https://e-apodeixi.gr/r/1", Some("alice")).await;
        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_entries_are_never_dropped() {
        let (queue, _dir) = queue().await;
        enqueue(&queue, "https://e-apodeixi.gr/r/1", Some("alice")).await;

        let offline = SyncReconciler::new(
            queue.clone(),
            Arc::new(FakeSubmitter {
                offline: true,
                ..Default::default()
            }),
            Arc::new(ParserRegistry::builtin()),
        );
        for _ in 0..3 {
            assert!(!offline.run_once().await.unwrap().is_success());
        }
        assert_eq!(queue.count().await.unwrap(), 1);

        let online = SyncReconciler::new(
            queue.clone(),
            Arc::new(FakeSubmitter::default()),
            Arc::new(ParserRegistry::builtin()),
        );
        assert!(online.run_once().await.unwrap().is_success());
        assert_eq!(queue.count().await.unwrap(), 0);
    }
}
