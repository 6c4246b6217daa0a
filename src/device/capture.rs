//! Capture path: queue first, then try to submit right away.

use std::sync::Arc;

use tracing::{debug, info};

use super::client::{ScanSubmitter, SubmitError};
use crate::models::{CapturedScan, NewScan, PendingScan, SubmitAck};
use crate::parsers::ParserRegistry;
use crate::repository::{DbError, PendingScanQueue};

/// What happened to one queued scan on a delivery attempt.
#[derive(Debug)]
pub enum Delivery {
    /// Accepted by the server and removed from the queue.
    Delivered(SubmitAck),
    /// Captured while logged out; kept until a user is known.
    NoUser,
    /// The site needs a device-rendered snapshot and none was captured.
    AwaitingRender,
    /// Submission failed; the entry stays queued.
    Failed(SubmitError),
}

/// Try to deliver one queued scan. Only a confirmed submission removes it.
pub async fn deliver_pending(
    queue: &PendingScanQueue,
    submitter: &dyn ScanSubmitter,
    registry: &ParserRegistry,
    pending: &PendingScan,
) -> Result<Delivery, DbError> {
    let Some(user_id) = pending.user_id.clone() else {
        return Ok(Delivery::NoUser);
    };

    if pending.html_snapshot.is_none() && registry.requires_snapshot(&pending.url) {
        return Ok(Delivery::AwaitingRender);
    }

    let scan = NewScan {
        url: pending.url.clone(),
        user_id,
        html_snapshot: pending.html_snapshot.clone(),
    };

    match submitter.submit(&scan).await {
        Ok(ack) => {
            queue.delete_by_url(&pending.url).await?;
            debug!(
                url = %pending.url,
                scanned_url_id = %ack.scanned_url_id,
                already_exists = ack.already_exists,
                "Scan delivered"
            );
            Ok(Delivery::Delivered(ack))
        }
        Err(e) => Ok(Delivery::Failed(e)),
    }
}

pub struct ScanCapture {
    queue: PendingScanQueue,
    submitter: Arc<dyn ScanSubmitter>,
    registry: Arc<ParserRegistry>,
}

impl ScanCapture {
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

    /// Record a scanned URL. It is durable in the queue before any network
    /// call is made.
    pub async fn capture(
        &self,
        url: &str,
        html_snapshot: Option<String>,
        user_id: Option<String>,
    ) -> Result<Delivery, DbError> {
        let captured = CapturedScan::new(url, user_id).with_snapshot(html_snapshot);
        let pending = self.queue.enqueue(&captured).await?;

        let delivery =
            deliver_pending(&self.queue, self.submitter.as_ref(), &self.registry, &pending).await?;

        match &delivery {
            Delivery::Delivered(_) => info!("Scan of {} delivered", url),
            Delivery::Failed(e) => info!("Scan of {} queued for later: {}", url, e),
            Delivery::NoUser => info!("Scan of {} queued until a user signs in", url),
            Delivery::AwaitingRender => {
                info!("Scan of {} queued; the page must be rendered on the device", url)
            }
        }

        Ok(delivery)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::DbContext;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Submitter that rejects a fixed set of URLs and can be taken offline.
    #[derive(Default)]
    pub(crate) struct FakeSubmitter {
        pub offline: bool,
        pub rejected: HashSet<String>,
        pub submitted: Mutex<Vec<NewScan>>,
    }

    #[async_trait]
    impl ScanSubmitter for FakeSubmitter {
        async fn submit(&self, scan: &NewScan) -> Result<SubmitAck, SubmitError> {
            if self.offline {
                return Err(SubmitError::Network("connection refused".into()));
            }
            if self.rejected.contains(&scan.url) {
                return Err(SubmitError::Server {
                    status: 500,
                    body: "internal error".into(),
                });
            }
            self.submitted.lock().unwrap().push(scan.clone());
            Ok(SubmitAck {
                scanned_url_id: format!("id-{}", scan.url),
                already_exists: false,
                dispatched: true,
            })
        }

        async fn is_reachable(&self) -> bool {
            !self.offline
        }
    }

    pub(crate) async fn queue() -> (PendingScanQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("device.db"));
        ctx.init_device_schema().await.unwrap();
        (ctx.pending(), dir)
    }

    fn capture(queue: PendingScanQueue, submitter: Arc<FakeSubmitter>) -> ScanCapture {
        ScanCapture::new(queue, submitter, Arc::new(ParserRegistry::builtin()))
    }

    #[tokio::test]
    async fn test_online_capture_is_delivered_and_dequeued() {
        let (queue, _dir) = queue().await;
        let submitter = Arc::new(FakeSubmitter::default());

        let delivery = capture(queue.clone(), submitter.clone())
            .capture("https://e-apodeixi.gr/r/1", None, Some("alice".into()))
            .await
            .unwrap();

        assert!(matches!(delivery, Delivery::Delivered(_)));
        assert_eq!(queue.count().await.unwrap(), 0);
        assert_eq!(submitter.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_capture_stays_queued() {
        let (queue, _dir) = queue().await;
        let submitter = Arc::new(FakeSubmitter {
            offline: true,
            ..Default::default()
        });

        let delivery = capture(queue.clone(), submitter)
            .capture("https://e-apodeixi.gr/r/1", None, Some("alice".into()))
            .await
            .unwrap();

        assert!(matches!(delivery, Delivery::Failed(_)));
        let pending = queue.get_by_url("https://e-apodeixi.gr/r/1").await.unwrap();
        assert_eq!(pending.unwrap().user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_logged_out_and_unrendered_scans_are_kept() {
        let (queue, _dir) = queue().await;
        let submitter = Arc::new(FakeSubmitter::default());
        let capture = capture(queue.clone(), submitter.clone());

        let anonymous = capture
            .capture("https://e-apodeixi.gr/r/2", None, None)
            .await
            .unwrap();
        assert!(matches!(anonymous, Delivery::NoUser));

        let unrendered = capture
            .capture("https://epsilon-einvoice.gr/v/3", Some("   ".into()), Some("alice".into()))
            .await
            .unwrap();
        assert!(matches!(unrendered, Delivery::AwaitingRender));

        assert_eq!(queue.count().await.unwrap(), 2);
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }
}
