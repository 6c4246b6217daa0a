//! Configuration management using the prefer crate for discovery.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{IngestClient, SubmitError};
use crate::fetch::{BrowserEngineConfig, BrowserHandle, FetchError, HttpClient};
use crate::parsers::{ParserRegistry, ParserSet, SiteEntry};
use crate::pipeline::DEFAULT_MAX_ATTEMPTS;
use crate::repository::DbContext;

/// Default server database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "receiptscan.db";

/// Default device queue filename.
pub const DEFAULT_DEVICE_DATABASE_FILENAME: &str = "device.db";

/// Default port for the ingestion server.
pub const DEFAULT_PORT: u16 = 3030;

/// Bounds for per-request fetch timeouts, in seconds.
const MIN_REQUEST_TIMEOUT: u64 = 10;
const MAX_REQUEST_TIMEOUT: u64 = 20;

/// Ingestion server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Address to bind, `host:port` or just a port.
    pub bind: String,
    /// Shared secret required on ingestion endpoints.
    pub ingest_secret: Option<String>,
}

/// Device-side settings.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Base URL of the ingestion server.
    pub server_url: String,
    pub ingest_secret: Option<String>,
    /// Signed-in user. Scans captured without one stay queued.
    pub user_id: Option<String>,
    /// Seconds between sync runs.
    pub sync_interval: u64,
    /// Longest backoff after failed runs, in seconds.
    pub max_backoff: u64,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Server database filename (or absolute path).
    pub database_filename: String,
    /// Device queue filename (or absolute path).
    pub device_database_filename: String,
    /// None for the default identity, "impersonate", or a custom string.
    pub user_agent: Option<String>,
    /// Per-request fetch timeout in seconds.
    pub request_timeout: u64,
    /// Headless render timeout in seconds.
    pub render_timeout: u64,
    /// Attempts per job before a timeout failure becomes final.
    pub max_attempts: i32,
    pub browser: BrowserEngineConfig,
    /// Extra site mappings checked before the built-ins.
    pub sites: Vec<SiteEntry>,
    pub server: ServerSettings,
    pub device: DeviceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("receiptscan");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            device_database_filename: DEFAULT_DEVICE_DATABASE_FILENAME.to_string(),
            user_agent: None,
            request_timeout: 15,
            render_timeout: 45,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            browser: BrowserEngineConfig::default(),
            sites: Vec::new(),
            server: ServerSettings {
                bind: format!("127.0.0.1:{}", DEFAULT_PORT),
                ingest_secret: None,
            },
            device: DeviceSettings {
                server_url: format!("http://127.0.0.1:{}", DEFAULT_PORT),
                ingest_secret: None,
                user_id: None,
                sync_interval: 900,
                max_backoff: 3600,
            },
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn device_database_path(&self) -> PathBuf {
        self.data_dir.join(&self.device_database_filename)
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    pub fn create_db_context(&self) -> DbContext {
        DbContext::new(&self.database_path())
    }

    pub fn create_device_context(&self) -> DbContext {
        DbContext::new(&self.device_database_path())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout
                .clamp(MIN_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT),
        )
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout.max(1))
    }

    pub fn registry(&self) -> ParserRegistry {
        ParserRegistry::with_overrides(&self.sites)
    }

    pub fn http_client(&self) -> Result<HttpClient, FetchError> {
        HttpClient::new(self.user_agent.as_deref(), self.request_timeout())
    }

    pub fn browser(&self) -> BrowserHandle {
        BrowserHandle::new(self.browser.clone())
    }

    pub fn parser_set(&self, browser: Arc<BrowserHandle>) -> Result<ParserSet, FetchError> {
        Ok(ParserSet::new(
            self.http_client()?,
            browser,
            self.render_timeout(),
        ))
    }

    pub fn ingest_client(&self) -> Result<IngestClient, SubmitError> {
        IngestClient::new(
            &self.device.server_url,
            self.device.ingest_secret.clone(),
            self.request_timeout(),
        )
    }

    /// Apply environment overrides. `lookup` returns the value of a variable.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        if let Some(secret) = var("RECEIPTSCAN_INGEST_SECRET") {
            tracing::debug!("Using RECEIPTSCAN_INGEST_SECRET from environment");
            self.server.ingest_secret = Some(secret.clone());
            self.device.ingest_secret = Some(secret);
        }
        if let Some(url) = var("RECEIPTSCAN_SERVER_URL") {
            tracing::debug!("Using RECEIPTSCAN_SERVER_URL from environment: {}", url);
            self.device.server_url = url;
        }
        if let Some(user) = var("RECEIPTSCAN_USER_ID") {
            self.device.user_id = Some(user);
        }
        if let Some(url) = var("BROWSER_URL") {
            tracing::debug!("Using BROWSER_URL from environment: {}", url);
            self.browser.remote_url = Some(url);
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_secret: Option<String>,
}

/// `[device]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<u64>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Server database filename or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Device queue filename or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Render timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserEngineConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sites: Vec<SiteEntry>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults when no file is found or it does not parse.
    pub async fn load() -> Self {
        match prefer::load("receiptscan").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the loaded config file.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = shellexpand::tilde(database).into_owned();
        }
        if let Some(ref database) = self.device_database {
            settings.device_database_filename = shellexpand::tilde(database).into_owned();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout.clamp(MIN_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT);
        }
        if let Some(timeout) = self.render_timeout {
            settings.render_timeout = timeout;
        }
        if let Some(max_attempts) = self.max_attempts {
            settings.max_attempts = max_attempts.max(1);
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
        if !self.sites.is_empty() {
            settings.sites = self.sites.clone();
        }

        if let Some(ref bind) = self.server.bind {
            settings.server.bind = bind.clone();
        }
        if let Some(ref secret) = self.server.ingest_secret {
            settings.server.ingest_secret = Some(secret.clone());
        }

        let device = &self.device;
        if let Some(ref url) = device.server_url {
            settings.device.server_url = url.clone();
        }
        if let Some(ref secret) = device.ingest_secret {
            settings.device.ingest_secret = Some(secret.clone());
        }
        if let Some(ref user) = device.user_id {
            settings.device.user_id = Some(user.clone());
        }
        if let Some(interval) = device.sync_interval {
            settings.device.sync_interval = interval.max(1);
        }
        if let Some(backoff) = device.max_backoff {
            settings.device.max_backoff = backoff;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            Config::default()
        }),
        None => Config::load().await,
    };

    let mut settings = Settings::default();

    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd()
    } else {
        config.base_dir().unwrap_or_else(cwd)
    };

    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides(|key| std::env::var(key).ok());

    (settings, config)
}
