//! Parser for sites that build the receipt with JavaScript on load.
//!
//! These portals accept server-side rendering, so the page is loaded in the
//! shared headless browser unless a snapshot was already captured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use tracing::debug;

use super::common::{
    child_text, first_text, parse_decimal, parse_percentage, parse_receipt_date, round2, selector,
};
use super::{non_empty, ExtractionError, ParseRequest, ParserKind, ReceiptParser};
use crate::fetch::BrowserHandle;
use crate::models::{ParsedItem, ParsedReceipt, ReceiptHeader};

/// Rendering is done once either items or the total appear.
const WAIT_FOR: &str = ".receipt-items .item, .receipt-total";

pub struct RenderedParser {
    browser: Arc<BrowserHandle>,
    user_agent: String,
    timeout: Duration,
}

impl RenderedParser {
    pub fn new(browser: Arc<BrowserHandle>, user_agent: String, timeout: Duration) -> Self {
        Self {
            browser,
            user_agent,
            timeout,
        }
    }

    pub(crate) fn extract(html: &str) -> Result<ParsedReceipt, ExtractionError> {
        let doc = Html::parse_document(html);

        let header_info = ReceiptHeader {
            store_name: first_text(&doc, &selector(".store-name")?),
            receipt_date: first_text(&doc, &selector(".receipt-date")?)
                .as_deref()
                .and_then(parse_receipt_date),
            total_amount: first_text(&doc, &selector(".receipt-total")?)
                .as_deref()
                .and_then(parse_decimal)
                .map(round2),
            uid: first_text(&doc, &selector(".receipt-uid")?),
        };

        let item_sel = selector(".receipt-items .item")?;
        let name_sel = selector(".item-name")?;
        let qty_sel = selector(".item-qty")?;
        let unit_sel = selector(".item-unit-price")?;
        let total_sel = selector(".item-total")?;
        let vat_sel = selector(".item-vat")?;

        let mut items = Vec::new();
        for (index, el) in doc.select(&item_sel).enumerate() {
            let name = child_text(el, &name_sel);
            let total_text = child_text(el, &total_sel);
            let unit_price = child_text(el, &unit_sel)
                .as_deref()
                .and_then(parse_decimal);

            let Some(name) = name else {
                if total_text.is_none() && unit_price.is_none() {
                    continue;
                }
                return Err(ExtractionError::Items(format!(
                    "item {} has a price but no name",
                    index + 1
                )));
            };

            let quantity = child_text(el, &qty_sel)
                .as_deref()
                .and_then(parse_decimal)
                .unwrap_or(1.0);

            let price = match (total_text.as_deref(), unit_price) {
                (Some(text), _) => parse_decimal(text).ok_or_else(|| {
                    ExtractionError::Items(format!(
                        "item {} ({}) has unreadable total '{}'",
                        index + 1,
                        name,
                        text
                    ))
                })?,
                (None, Some(unit)) => unit * quantity,
                (None, None) => {
                    return Err(ExtractionError::Items(format!(
                        "item {} ({}) has no price",
                        index + 1,
                        name
                    )))
                }
            };

            items.push(ParsedItem {
                name,
                quantity,
                price: round2(price),
                unit_price,
                vat_percentage: child_text(el, &vat_sel)
                    .as_deref()
                    .and_then(parse_percentage),
            });
        }

        non_empty(ParsedReceipt { header_info, items })
    }
}

#[async_trait]
impl ReceiptParser for RenderedParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Rendered
    }

    async fn parse(&self, request: &ParseRequest<'_>) -> Result<ParsedReceipt, ExtractionError> {
        let html = match request.html_snapshot {
            Some(html) => html.to_string(),
            None => {
                debug!(
                    job_id = request.job_id.unwrap_or("-"),
                    "Rendering {}", request.url
                );
                self.browser
                    .render(request.url, Some(WAIT_FOR), &self.user_agent, self.timeout)
                    .await?
            }
        };

        Self::extract(&html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BrowserEngineConfig;

    const PAGE: &str = r#"<html><body><div id="app">
        <h1 class="store-name">Μασούτης</h1>
        <div class="receipt-date">Ημ/νία: 12-01-24</div>
        <div class="receipt-uid">ABCD-1234</div>
        <ul class="receipt-items">
          <li class="item">
            <span class="item-name">Φέτα 400g</span><span class="item-qty">1</span>
            <span class="item-unit-price">4,95</span><span class="item-total">4,95</span>
            <span class="item-vat">13%</span>
          </li>
          <li class="item">
            <span class="item-name">Νερό 6x1.5L</span><span class="item-qty">3</span>
            <span class="item-unit-price">1,10</span>
          </li>
          <li class="item"><span class="item-qty">—</span></li>
        </ul>
        <div class="receipt-total">Σύνολο 8,25 €</div>
    </div></body></html>"#;

    #[test]
    fn test_extract_rendered_page() {
        let parsed = RenderedParser::extract(PAGE).unwrap();

        assert_eq!(parsed.header_info.store_name.as_deref(), Some("Μασούτης"));
        assert_eq!(parsed.header_info.uid.as_deref(), Some("ABCD-1234"));
        assert_eq!(parsed.header_info.total_amount, Some(8.25));
        assert_eq!(
            parsed.header_info.receipt_date.unwrap().to_rfc3339(),
            "2024-01-12T00:00:00+00:00"
        );

        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].price, 4.95);
        assert_eq!(parsed.items[0].vat_percentage, Some(13.0));
        // No line total; falls back to unit price times quantity
        assert_eq!(parsed.items[1].price, 3.30);
        assert_eq!(parsed.items[1].vat_percentage, None);
    }

    #[test]
    fn test_header_only_receipt_is_accepted() {
        let html = r#"<div class="store-name">Kiosk</div><div class="receipt-total">1,20</div>"#;
        let parsed = RenderedParser::extract(html).unwrap();
        assert!(parsed.items.is_empty());
        assert_eq!(parsed.header_info.total_amount, Some(1.2));
    }

    #[test]
    fn test_nameless_priced_item_fails() {
        let html = r#"<ul class="receipt-items">
            <li class="item"><span class="item-total">2,00</span></li>
        </ul>"#;
        assert!(matches!(
            RenderedParser::extract(html),
            Err(ExtractionError::Items(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_skips_browser() {
        // The browser is never started when a snapshot is provided
        let browser = Arc::new(BrowserHandle::new(BrowserEngineConfig {
            remote_url: Some("http://127.0.0.1:9".to_string()),
            ..Default::default()
        }));
        let parser = RenderedParser::new(browser.clone(), "UA".into(), Duration::from_secs(1));

        let parsed = parser
            .parse(&ParseRequest::new("https://ereceipt.gr/r/1").with_snapshot(Some(PAGE)))
            .await
            .unwrap();

        assert_eq!(parsed.items.len(), 2);
        assert!(!browser.is_running().await);
    }
}
