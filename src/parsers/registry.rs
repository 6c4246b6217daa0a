//! Hostname to parser mapping.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::ParserKind;

/// Built-in site families, checked after configured overrides.
pub const DEFAULT_SITES: &[(&str, ParserKind)] = &[
    ("e-apodeixi.gr", ParserKind::Framed),
    ("ereceipt.gr", ParserKind::Rendered),
    ("entersoft.gr", ParserKind::Rendered),
    ("epsilon-einvoice.gr", ParserKind::ClientRendered),
    ("impact.gr", ParserKind::ClientRendered),
];

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("No parser registered for host {0}")]
    NotFound(String),

    #[error("Invalid URL {0}")]
    InvalidUrl(String),
}

/// One `(host_suffix, parser)` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteEntry {
    pub host_suffix: String,
    pub parser: ParserKind,
}

impl SiteEntry {
    pub fn new(host_suffix: &str, parser: ParserKind) -> Self {
        Self {
            host_suffix: normalize_host(host_suffix),
            parser,
        }
    }

    /// `host` equals the suffix or is a subdomain of it.
    fn matches(&self, host: &str) -> bool {
        host == self.host_suffix
            || host
                .strip_suffix(self.host_suffix.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// Ordered site table; the first matching entry wins.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    entries: Vec<SiteEntry>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ParserRegistry {
    pub fn new(entries: Vec<SiteEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| SiteEntry::new(&e.host_suffix, e.parser))
            .filter(|e| !e.host_suffix.is_empty())
            .collect();
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::new(
            DEFAULT_SITES
                .iter()
                .map(|(host, kind)| SiteEntry::new(host, *kind))
                .collect(),
        )
    }

    /// Built-ins preceded by `overrides`.
    pub fn with_overrides(overrides: &[SiteEntry]) -> Self {
        let mut entries = overrides.to_vec();
        entries.extend(Self::builtin().entries);
        Self::new(entries)
    }

    pub fn entries(&self) -> &[SiteEntry] {
        &self.entries
    }

    pub fn resolve(&self, url: &str) -> Result<ParserKind, RegistryError> {
        let parsed = Url::parse(url).map_err(|_| RegistryError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RegistryError::InvalidUrl(url.to_string()))?;
        self.resolve_host(host)
    }

    pub fn resolve_host(&self, host: &str) -> Result<ParserKind, RegistryError> {
        let host = normalize_host(host);
        self.entries
            .iter()
            .find(|entry| entry.matches(&host))
            .map(|entry| entry.parser)
            .ok_or(RegistryError::NotFound(host))
    }

    /// Whether `url` belongs to a site that can only be parsed from a
    /// device-rendered snapshot. Unknown sites are not.
    pub fn requires_snapshot(&self, url: &str) -> bool {
        self.resolve(url)
            .map(|kind| kind.requires_snapshot())
            .unwrap_or(false)
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}
