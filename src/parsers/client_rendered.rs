//! Parser for sites that refuse server-side fetches.
//!
//! The receipt only exists after the device's web view has run the page
//! scripts, so this parser works exclusively from the submitted snapshot
//! and never touches the network.

use async_trait::async_trait;
use scraper::Html;

use super::common::{
    child_text, first_text, parse_decimal, parse_percentage, parse_receipt_date, round2, selector,
};
use super::{non_empty, ExtractionError, ParseRequest, ParserKind, ReceiptParser};
use crate::models::{ParsedItem, ParsedReceipt, ReceiptHeader};

pub struct ClientRenderedParser;

impl ClientRenderedParser {
    pub(crate) fn extract(html: &str) -> Result<ParsedReceipt, ExtractionError> {
        let doc = Html::parse_document(html);
        let field = |name: &str| -> Result<Option<String>, ExtractionError> {
            Ok(first_text(
                &doc,
                &selector(&format!("[data-field='{}']", name))?,
            ))
        };

        let header_info = ReceiptHeader {
            store_name: field("store")?,
            receipt_date: field("date")?.as_deref().and_then(parse_receipt_date),
            total_amount: field("total")?
                .as_deref()
                .and_then(parse_decimal)
                .map(round2),
            uid: field("uid")?,
        };

        let row_sel = selector("[data-row='item']")?;
        let name_sel = selector("[data-col='name']")?;
        let qty_sel = selector("[data-col='qty']")?;
        let price_sel = selector("[data-col='price']")?;
        let unit_sel = selector("[data-col='unit']")?;
        let vat_sel = selector("[data-col='vat']")?;

        let mut items = Vec::new();
        for (index, row) in doc.select(&row_sel).enumerate() {
            let (name, price_text) = match (child_text(row, &name_sel), child_text(row, &price_sel))
            {
                (None, None) => continue,
                (Some(name), Some(price)) => (name, price),
                (name, _) => {
                    return Err(ExtractionError::Items(format!(
                        "row {} ({}) is missing a name or price",
                        index + 1,
                        name.unwrap_or_default()
                    )))
                }
            };

            let price = parse_decimal(&price_text).ok_or_else(|| {
                ExtractionError::Items(format!(
                    "row {} ({}) has unreadable price '{}'",
                    index + 1,
                    name,
                    price_text
                ))
            })?;

            items.push(ParsedItem {
                name,
                quantity: child_text(row, &qty_sel)
                    .as_deref()
                    .and_then(parse_decimal)
                    .unwrap_or(1.0),
                price: round2(price),
                unit_price: child_text(row, &unit_sel)
                    .as_deref()
                    .and_then(parse_decimal),
                vat_percentage: child_text(row, &vat_sel)
                    .as_deref()
                    .and_then(parse_percentage),
            });
        }

        non_empty(ParsedReceipt { header_info, items })
    }
}

#[async_trait]
impl ReceiptParser for ClientRenderedParser {
    fn kind(&self) -> ParserKind {
        ParserKind::ClientRendered
    }

    async fn parse(&self, request: &ParseRequest<'_>) -> Result<ParsedReceipt, ExtractionError> {
        let html = request
            .html_snapshot
            .filter(|html| !html.trim().is_empty())
            .ok_or(ExtractionError::MissingRenderedContent)?;
        Self::extract(html)
    }
}
