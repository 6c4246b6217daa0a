//! HTTP client for the ingestion server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::models::{NewScan, SubmitAck};
use crate::server::INGEST_SECRET_HEADER;

/// Connectivity probes give up quickly.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Server rejected the ingest secret")]
    Unauthorized,

    #[error("Server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for SubmitError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SubmitError::Timeout
        } else {
            SubmitError::Network(e.to_string())
        }
    }
}

/// Where scans are submitted.
#[async_trait]
pub trait ScanSubmitter: Send + Sync {
    async fn submit(&self, scan: &NewScan) -> Result<SubmitAck, SubmitError>;

    /// Whether the server can currently be reached.
    async fn is_reachable(&self) -> bool;
}

#[derive(Clone)]
pub struct IngestClient {
    client: Client,
    base_url: String,
    secret: Option<String>,
}

impl IngestClient {
    pub fn new(
        base_url: &str,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SubmitError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmitError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ScanSubmitter for IngestClient {
    async fn submit(&self, scan: &NewScan) -> Result<SubmitAck, SubmitError> {
        let url = format!("{}/api/scans", self.base_url);
        debug!("Submitting {} to {}", scan.url, url);

        let mut request = self.client.post(&url).json(scan);
        if let Some(ref secret) = self.secret {
            request = request.header(INGEST_SECRET_HEADER, secret);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(SubmitError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmitError::Server {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<SubmitAck>().await?)
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Server unreachable: {}", e);
                false
            }
        }
    }
}
