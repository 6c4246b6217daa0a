//! In-process event delivery.
//!
//! Newly submitted scans are pushed onto a channel and handed to the
//! dispatcher by a background worker. A `Retry` acknowledgment is honoured
//! by redelivering the same event after a delay, as an external event
//! source would.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::dispatcher::{Ack, Dispatcher};
use crate::models::ScanEvent;

/// Capacity of the delivery channel.
pub const DELIVERY_BUFFER: usize = 256;

/// Sending half used by the submission endpoint.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<ScanEvent>,
}

impl DeliveryQueue {
    /// Queue an event. Returns false when the worker has stopped.
    pub async fn deliver(&self, event: ScanEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Start the delivery worker. The worker stops once every [`DeliveryQueue`]
/// clone has been dropped and the channel is drained.
pub fn spawn_delivery_worker(
    dispatcher: Dispatcher,
    retry_delay: Duration,
) -> (DeliveryQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ScanEvent>(DELIVERY_BUFFER);

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                deliver_with_retry(&dispatcher, &event, retry_delay).await;
            });
        }
        debug!("Delivery channel closed");
    });

    (DeliveryQueue { tx }, handle)
}

/// Deliver until the dispatcher stops asking for redelivery or attempts run out.
pub async fn deliver_with_retry(
    dispatcher: &Dispatcher,
    event: &ScanEvent,
    retry_delay: Duration,
) -> Ack {
    let max_deliveries = dispatcher.max_attempts().max(1) as u32;
    let mut delivery = 1;

    loop {
        let ack = dispatcher.handle(event).await;
        debug!(?ack, delivery, "Scan event handled");

        if !ack.is_retryable() || delivery >= max_deliveries {
            if ack.is_retryable() {
                warn!(
                    job_id = ack.job_id().unwrap_or("-"),
                    "Giving up on scan event after {} deliveries", delivery
                );
            }
            return ack;
        }

        tokio::time::sleep(retry_delay * 2u32.pow(delivery - 1)).await;
        delivery += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{BrowserEngineConfig, BrowserHandle, HttpClient};
    use crate::models::{JobStatus, NewScan};
    use crate::parsers::{ParserKind, ParserRegistry, ParserSet, SiteEntry};
    use crate::pipeline::PersistenceWriter;
    use crate::repository::DbContext;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(ctx: &DbContext, timeout: Duration) -> Dispatcher {
        let registry =
            ParserRegistry::with_overrides(&[SiteEntry::new("127.0.0.1", ParserKind::Framed)]);
        let browser = Arc::new(BrowserHandle::new(BrowserEngineConfig::default()));
        Dispatcher::new(
            ctx.jobs(),
            Arc::new(registry),
            Arc::new(ParserSet::new(
                HttpClient::new(None, timeout).unwrap(),
                browser,
                timeout,
            )),
            PersistenceWriter::new(Arc::new(ctx.receipts())),
        )
    }

    #[tokio::test]
    async fn test_worker_delivers_events() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("server.db"));
        ctx.init_schema().await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<span class="total-amount">3,00</span>
                   <table class="lines"><tbody></tbody></table>"#,
            ))
            .mount(&server)
            .await;

        let (scan, _) = ctx
            .scans()
            .insert(&NewScan {
                url: format!("{}/r/7", server.uri()),
                user_id: "bob".into(),
                html_snapshot: None,
            })
            .await
            .unwrap();

        let (queue, worker) = spawn_delivery_worker(
            dispatcher(&ctx, Duration::from_secs(5)),
            Duration::from_millis(10),
        );
        assert!(queue.deliver(ScanEvent::insert(&scan)).await);
        drop(queue);
        worker.await.unwrap();

        let mut status = None;
        for _ in 0..50 {
            status = ctx
                .jobs()
                .get_by_scanned_url(&scan.id)
                .await
                .unwrap()
                .map(|job| job.status);
            if status == Some(JobStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("server.db"));
        ctx.init_schema().await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let (scan, _) = ctx
            .scans()
            .insert(&NewScan {
                url: format!("{}/slow", server.uri()),
                user_id: "bob".into(),
                html_snapshot: None,
            })
            .await
            .unwrap();

        let dispatcher = dispatcher(&ctx, Duration::from_millis(150)).with_max_attempts(3);
        let event = ScanEvent::insert(&scan);
        let ack = deliver_with_retry(&dispatcher, &event, Duration::from_millis(5)).await;

        assert!(matches!(ack, Ack::Failed { .. }), "{:?}", ack);
        let job = ctx.jobs().get_by_scanned_url(&scan.id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 3);
    }
}
