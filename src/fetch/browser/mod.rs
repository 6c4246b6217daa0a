//! Shared headless browser for pages that need script execution.
//!
//! One browser process per handle, started lazily on first use and
//! re-created when its event handler has stopped (crash or lost DevTools
//! connection). Every render gets its own page, which is closed on every
//! exit path. Owners must call [`BrowserHandle::shutdown`] before exiting.

mod config;

pub use config::BrowserEngineConfig;

use std::time::Duration;

use thiserror::Error;

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

/// Rendering failures.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    Unavailable,

    #[error("Failed to start browser: {0}")]
    Launch(String),

    #[error("Page operation failed: {0}")]
    Page(String),

    #[error("Timed out after {}s rendering {url}", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },
}

impl BrowserError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::Timeout { .. })
    }
}

/// How long to sleep between checks for the wait-for selector.
#[cfg(feature = "browser")]
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[cfg(feature = "browser")]
struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    remote: bool,
}

#[cfg(feature = "browser")]
impl Session {
    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }
}

/// Lazily started, explicitly shut down browser.
#[cfg(feature = "browser")]
pub struct BrowserHandle {
    config: BrowserEngineConfig,
    session: Mutex<Option<Session>>,
}

#[cfg(feature = "browser")]
impl BrowserHandle {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Whether a live browser session currently exists.
    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(Session::is_alive)
    }

    /// Render `url` and return the resulting DOM as HTML.
    ///
    /// When `wait_for` is set, waits until that selector matches before
    /// reading the content. The whole render is bounded by `timeout`.
    pub async fn render(
        &self,
        url: &str,
        wait_for: Option<&str>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<String, BrowserError> {
        let page = self.open_page().await?;

        let result =
            tokio::time::timeout(timeout, Self::render_page(&page, url, wait_for, user_agent))
                .await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page for {}: {}", url, e);
        }

        match result {
            Ok(content) => content,
            Err(_) => Err(BrowserError::Timeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }

    /// Stop the browser. A later render starts a fresh one.
    pub async fn shutdown(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };

        if !session.remote {
            info!("Shutting down browser");
            if let Err(e) = session.browser.close().await {
                warn!("Failed to close browser cleanly: {}", e);
            }
            if let Err(e) = session.browser.wait().await {
                debug!("Failed to wait for browser exit: {}", e);
            }
        }
        session.handler.abort();
    }

    /// Create a page, (re)starting the browser if needed. The session lock
    /// is held only while the page is created.
    async fn open_page(&self) -> Result<Page, BrowserError> {
        let mut guard = self.session.lock().await;

        if !guard.as_ref().is_some_and(Session::is_alive) {
            if let Some(dead) = guard.take() {
                warn!("Browser connection lost, restarting");
                dead.handler.abort();
            }
            *guard = Some(self.start().await?);
        }

        let Some(session) = guard.as_ref() else {
            return Err(BrowserError::Launch("browser session missing".to_string()));
        };

        match session.browser.new_page("about:blank").await {
            Ok(page) => Ok(page),
            Err(e) => {
                // Treat the session as dead so the next call starts over
                if let Some(dead) = guard.take() {
                    dead.handler.abort();
                }
                Err(BrowserError::Page(format!("failed to open page: {}", e)))
            }
        }
    }

    async fn render_page(
        page: &Page,
        url: &str,
        wait_for: Option<&str>,
        user_agent: &str,
    ) -> Result<String, BrowserError> {
        let page_err = |e: chromiumoxide::error::CdpError| BrowserError::Page(e.to_string());

        page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .map_err(page_err)?;

        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| BrowserError::Page(format!("invalid url: {}", e)))?;
        page.execute(nav_params).await.map_err(page_err)?;
        page.wait_for_navigation().await.map_err(page_err)?;

        if let Some(selector) = wait_for {
            debug!("Waiting for selector: {}", selector);
            while page.find_element(selector).await.is_err() {
                tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
            }
        }

        page.content().await.map_err(page_err)
    }

    async fn start(&self) -> Result<Session, BrowserError> {
        if let Some(remote_url) = self.config.remote_url.clone() {
            return self.connect_remote(&remote_url).await;
        }

        info!("Launching browser (headless={})", self.config.headless);

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_secs(self.config.timeout))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        if let Some(ref path) = self.config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Session {
            browser,
            handler: spawn_handler(handler),
            remote: false,
        })
    }

    async fn connect_remote(&self, url: &str) -> Result<Session, BrowserError> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, self.config.timeout
        );

        // Resolve the WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout))
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .map_err(|e| BrowserError::Launch(format!("remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| BrowserError::Launch(format!("bad version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BrowserError::Launch("No webSocketDebuggerUrl in response".to_string())
            })?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.config.timeout),
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Session {
            browser,
            handler: spawn_handler(handler),
            remote: true,
        })
    }
}

/// Drive the DevTools event loop until the connection drops.
#[cfg(feature = "browser")]
fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("Browser handler stopped: {}", e);
                break;
            }
        }
    })
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserHandle {
    #[allow(dead_code)]
    config: BrowserEngineConfig,
}

#[cfg(not(feature = "browser"))]
impl BrowserHandle {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }

    pub async fn is_running(&self) -> bool {
        false
    }

    pub async fn render(
        &self,
        _url: &str,
        _wait_for: Option<&str>,
        _user_agent: &str,
        _timeout: Duration,
    ) -> Result<String, BrowserError> {
        Err(BrowserError::Unavailable)
    }

    pub async fn shutdown(&self) {}
}
