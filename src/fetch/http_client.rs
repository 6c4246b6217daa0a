//! HTTP client for fetching receipt pages.

use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::Client;
use tracing::debug;

use super::user_agent::resolve_user_agent;
use super::FetchError;

/// Thin wrapper over a configured reqwest client.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    user_agent: String,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client.
    /// - None: default browser identity
    /// - Some("impersonate"): rotating real browser identity
    /// - Some(custom): custom user agent string
    pub fn new(user_agent_config: Option<&str>, timeout: Duration) -> Result<Self, FetchError> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            user_agent,
            timeout,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET a page and return its body as text. Non-2xx is an error.
    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "el-GR,el;q=0.9,en;q=0.8");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}
