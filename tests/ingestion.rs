//! End-to-end ingestion: device capture, HTTP submission, dispatch and
//! persistence over the real schema.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use receiptscan::config::Settings;
use receiptscan::device::{Delivery, IngestClient, ScanCapture, SyncReconciler};
use receiptscan::models::{JobStatus, ProcessingJob, Receipt, ScanEvent};
use receiptscan::parsers::{ParserKind, SiteEntry};
use receiptscan::pipeline::spawn_delivery_worker;
use receiptscan::repository::{DbContext, PendingScanQueue};
use receiptscan::server::{build_dispatcher, create_router, AppState, INGEST_SECRET_HEADER};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "integration-secret";

const SHELL: &str = r#"<html><body>
    <iframe id="receipt-frame" src="/view/77"></iframe>
</body></html>"#;

const FRAME: &str = r#"<html><body>
    <div class="issuer"><span class="name">ΚΑΦΕΝΕΙΟ Η ΠΛΑΤΕΙΑ</span></div>
    <span class="issue-date">12/09/2024</span>
    <span class="mark">400009876543210</span>
    <table class="lines"><tbody>
      <tr>
        <td class="description">Φρέντο</td><td class="qty">2</td>
        <td class="unit-price">2,00</td><td class="net">3,23</td>
        <td class="vat-amount">0,77</td><td class="vat-rate">24%</td>
      </tr>
      <tr>
        <td class="description">Τοστ</td><td class="qty">1</td>
        <td class="net">2,21</td><td class="vat-amount">0,29</td>
        <td class="vat-rate">13%</td>
      </tr>
    </tbody></table>
    <span class="total-amount">6,50</span>
</body></html>"#;

struct TestServer {
    addr: SocketAddr,
    ctx: DbContext,
    settings: Settings,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        settings.sites = vec![SiteEntry::new("127.0.0.1", ParserKind::Framed)];
        settings.server.ingest_secret = Some(SECRET.to_string());
        settings.device.ingest_secret = Some(SECRET.to_string());

        let ctx = settings.create_db_context();
        ctx.init_schema().await.unwrap();

        let browser = Arc::new(settings.browser());
        let dispatcher = build_dispatcher(&settings, &ctx, browser).unwrap();
        let (delivery, _worker) =
            spawn_delivery_worker(dispatcher.clone(), Duration::from_millis(50));
        let app = create_router(AppState::new(&ctx, dispatcher, delivery, SECRET));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            ctx,
            settings,
            _dir: dir,
        }
    }

    fn client(&self) -> IngestClient {
        IngestClient::new(
            &format!("http://{}", self.addr),
            Some(SECRET.to_string()),
            Duration::from_secs(10),
        )
        .unwrap()
    }

    async fn device_queue(&self) -> PendingScanQueue {
        let ctx = self.settings.create_device_context();
        ctx.init_device_schema().await.unwrap();
        ctx.pending()
    }

    async fn wait_for_receipt(&self, scanned_url_id: &str) -> Receipt {
        for _ in 0..100 {
            if let Some(receipt) = self
                .ctx
                .receipts()
                .get_by_scanned_url(scanned_url_id)
                .await
                .unwrap()
            {
                return receipt;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no receipt stored for {}", scanned_url_id);
    }

    async fn wait_for_job(&self, scanned_url_id: &str, status: JobStatus) -> ProcessingJob {
        for _ in 0..100 {
            let job = self
                .ctx
                .jobs()
                .get_by_scanned_url(scanned_url_id)
                .await
                .unwrap();
            if let Some(job) = job.filter(|j| j.status == status) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job for {} never reached {}", scanned_url_id, status);
    }

    async fn wait_for_user_receipt(&self, user_id: &str) -> Receipt {
        for _ in 0..100 {
            let receipts = self.ctx.receipts().list_for_user(user_id).await.unwrap();
            if let Some(receipt) = receipts.into_iter().next() {
                return receipt;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no receipt stored for {}", user_id);
    }
}

async fn receipt_site() -> MockServer {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/77"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SHELL))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/view/77"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FRAME))
        .mount(&site)
        .await;
    site
}

#[tokio::test]
async fn test_scan_is_ingested_once() {
    let server = TestServer::start().await;
    let site = receipt_site().await;
    let url = format!("{}/r/77", site.uri());

    let queue = server.device_queue().await;
    let capture = ScanCapture::new(
        queue.clone(),
        Arc::new(server.client()),
        Arc::new(server.settings.registry()),
    );

    let Delivery::Delivered(ack) = capture
        .capture(&url, None, Some("alice".into()))
        .await
        .unwrap()
    else {
        panic!("scan was not delivered");
    };
    assert!(!ack.already_exists);
    assert_eq!(queue.count().await.unwrap(), 0);

    let receipt = server.wait_for_receipt(&ack.scanned_url_id).await;
    assert_eq!(receipt.user_id, "alice");
    assert_eq!(receipt.store_name.as_deref(), Some("ΚΑΦΕΝΕΙΟ Η ΠΛΑΤΕΙΑ"));
    assert_eq!(receipt.uid.as_deref(), Some("400009876543210"));
    assert_eq!(receipt.total_amount, Some(6.50));

    let items = server.ctx.receipts().items(&receipt.id).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "Φρέντο");
    assert_eq!(items[0].price, 4.0);
    assert_eq!(items[1].price, 2.5);

    let job = server.wait_for_job(&ack.scanned_url_id, JobStatus::Completed).await;
    assert_eq!(job.attempts, 1);

    // Scanning the same receipt again is confirmed without a second record.
    let Delivery::Delivered(again) = capture
        .capture(&url, None, Some("alice".into()))
        .await
        .unwrap()
    else {
        panic!("rescan was not delivered");
    };
    assert!(again.already_exists);
    assert!(!again.dispatched);
    assert_eq!(again.scanned_url_id, ack.scanned_url_id);

    // Redelivering the original event is acknowledged as a duplicate.
    let scan = server
        .ctx
        .scans()
        .get(&ack.scanned_url_id)
        .await
        .unwrap()
        .unwrap();
    let response = reqwest::Client::new()
        .post(format!("http://{}/hooks/scan-event", server.addr))
        .header(INGEST_SECRET_HEADER, SECRET)
        .json(&ScanEvent::insert(&scan))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "duplicate");

    assert_eq!(
        server.ctx.receipts().list_for_user("alice").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_offline_capture_is_synced_later() {
    let server = TestServer::start().await;
    let site = receipt_site().await;
    let url = format!("{}/r/77", site.uri());
    let queue = server.device_queue().await;
    let registry = Arc::new(server.settings.registry());

    // Nothing listens on the closed port.
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let offline = IngestClient::new(
        &format!("http://{}", closed),
        Some(SECRET.to_string()),
        Duration::from_secs(2),
    )
    .unwrap();

    let capture = ScanCapture::new(queue.clone(), Arc::new(offline), registry.clone());
    let delivery = capture
        .capture(&url, None, Some("bob".into()))
        .await
        .unwrap();
    assert!(matches!(delivery, Delivery::Failed(_)));
    capture
        .capture("https://www.e-apodeixi.gr/r/2", None, None)
        .await
        .unwrap();
    assert_eq!(queue.count().await.unwrap(), 2);

    let reconciler = SyncReconciler::new(queue.clone(), Arc::new(server.client()), registry);
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.deferred, 1);
    assert!(report.is_success());

    let remaining = queue.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user_id, None);

    assert_eq!(server.ctx.scans().count().await.unwrap(), 1);
    let receipt = server.wait_for_user_receipt("bob").await;
    assert_eq!(receipt.user_id, "bob");
}
