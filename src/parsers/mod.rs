//! Receipt extraction parsers.
//!
//! Each source-site family has one parser variant. Variants share a single
//! contract ([`ReceiptParser::parse`]) and are selected by [`ParserKind`],
//! which the [`ParserRegistry`] resolves from the URL's hostname. Adding a
//! site family means adding a variant and a registry entry.

mod client_rendered;
pub mod common;
mod framed;
mod registry;
mod rendered;

pub use client_rendered::ClientRenderedParser;
pub use framed::FramedParser;
pub use registry::{ParserRegistry, RegistryError, SiteEntry, DEFAULT_SITES};
pub use rendered::RenderedParser;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::{BrowserError, BrowserHandle, FetchError, HttpClient};
use crate::models::ParsedReceipt;

/// Extraction failures.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The site only produces receipt content after client-side rendering
    /// and no snapshot was supplied.
    #[error("Site requires a client-rendered HTML snapshot but none was supplied")]
    MissingRenderedContent,

    #[error("No embedded receipt frame found on {0}")]
    MissingEmbeddedContent(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Render(#[from] BrowserError),

    #[error("Invalid selector {0}")]
    Selector(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Item extraction failed: {0}")]
    Items(String),

    #[error("No items or header fields found; the page layout may have changed")]
    Empty,
}

impl ExtractionError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ExtractionError::Fetch(e) => e.is_timeout(),
            ExtractionError::Render(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Closed set of parser variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Server-fetched page that embeds the receipt in a frame.
    Framed,
    /// Server-rendered with the headless browser.
    Rendered,
    /// Only renders on the device; requires a client-supplied snapshot.
    ClientRendered,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Framed => "framed",
            Self::Rendered => "rendered",
            Self::ClientRendered => "client_rendered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "framed" => Some(Self::Framed),
            "rendered" => Some(Self::Rendered),
            "client_rendered" => Some(Self::ClientRendered),
            _ => None,
        }
    }

    /// Whether the site can only be parsed from a device-rendered snapshot.
    pub fn requires_snapshot(&self) -> bool {
        matches!(self, Self::ClientRendered)
    }
}

impl std::fmt::Display for ParserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to a parser.
#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'a> {
    pub url: &'a str,
    pub job_id: Option<&'a str>,
    pub html_snapshot: Option<&'a str>,
}

impl<'a> ParseRequest<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            job_id: None,
            html_snapshot: None,
        }
    }

    pub fn with_job(mut self, job_id: &'a str) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_snapshot(mut self, html: Option<&'a str>) -> Self {
        self.html_snapshot = html;
        self
    }
}

/// Contract shared by every parser variant.
#[async_trait]
pub trait ReceiptParser: Send + Sync {
    fn kind(&self) -> ParserKind;

    async fn parse(&self, request: &ParseRequest<'_>) -> Result<ParsedReceipt, ExtractionError>;
}

/// One instance of every parser variant.
pub struct ParserSet {
    framed: FramedParser,
    rendered: RenderedParser,
    client_rendered: ClientRenderedParser,
}

impl ParserSet {
    pub fn new(http: HttpClient, browser: Arc<BrowserHandle>, render_timeout: Duration) -> Self {
        let user_agent = http.user_agent().to_string();
        Self {
            framed: FramedParser::new(http),
            rendered: RenderedParser::new(browser, user_agent, render_timeout),
            client_rendered: ClientRenderedParser,
        }
    }

    pub fn get(&self, kind: ParserKind) -> &dyn ReceiptParser {
        match kind {
            ParserKind::Framed => &self.framed,
            ParserKind::Rendered => &self.rendered,
            ParserKind::ClientRendered => &self.client_rendered,
        }
    }

    pub async fn parse(
        &self,
        kind: ParserKind,
        request: &ParseRequest<'_>,
    ) -> Result<ParsedReceipt, ExtractionError> {
        self.get(kind).parse(request).await
    }
}

/// Reject results with neither items nor header fields.
pub(crate) fn non_empty(parsed: ParsedReceipt) -> Result<ParsedReceipt, ExtractionError> {
    if parsed.is_empty() {
        Err(ExtractionError::Empty)
    } else {
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BrowserEngineConfig;

    #[test]
    fn test_parser_kind_round_trip() {
        for kind in [
            ParserKind::Framed,
            ParserKind::Rendered,
            ParserKind::ClientRendered,
        ] {
            assert_eq!(ParserKind::from_str(kind.as_str()), Some(kind));
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
        assert!(ParserKind::ClientRendered.requires_snapshot());
        assert!(!ParserKind::Framed.requires_snapshot());
    }

    #[tokio::test]
    async fn test_parser_set_dispatches_by_kind() {
        let http = HttpClient::new(None, Duration::from_secs(5)).unwrap();
        let browser = Arc::new(BrowserHandle::new(BrowserEngineConfig::default()));
        let set = ParserSet::new(http, browser, Duration::from_secs(5));

        for kind in [
            ParserKind::Framed,
            ParserKind::Rendered,
            ParserKind::ClientRendered,
        ] {
            assert_eq!(set.get(kind).kind(), kind);
        }

        let err = set
            .parse(
                ParserKind::ClientRendered,
                &ParseRequest::new("https://epsilon-einvoice.gr/v/1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::MissingRenderedContent));
    }
}
