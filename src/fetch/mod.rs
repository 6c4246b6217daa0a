//! Network access for receipt pages: a plain HTTP client and a shared
//! headless browser for pages that only exist after script execution.

pub mod browser;
mod http_client;
mod user_agent;

pub use browser::{BrowserEngineConfig, BrowserError, BrowserHandle};
pub use http_client::HttpClient;
pub use user_agent::{resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use thiserror::Error;

/// HTTP fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    pub fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}
