//! Parser for portals that wrap the receipt document in a frame.
//!
//! The landing page the QR code points at is a shell; the receipt itself
//! lives in an embedded frame. The receipt document has a line table with
//! separate net and VAT columns.

use async_trait::async_trait;
use scraper::Html;
use tracing::debug;
use url::Url;

use super::common::{
    child_text, first_text, parse_decimal, parse_percentage, parse_receipt_date, round2, selector,
};
use super::{non_empty, ExtractionError, ParseRequest, ParserKind, ReceiptParser};
use crate::fetch::HttpClient;
use crate::models::{ParsedItem, ParsedReceipt, ReceiptHeader};

/// Frames checked in order; the first with a `src` wins.
const FRAME_SELECTORS: &[&str] = &[
    "iframe#receipt-frame",
    "iframe[src*='receipt']",
    "iframe[src]",
    "frame[src]",
];

/// Marker for a document that already holds the receipt lines.
const LINES_TABLE: &str = "table.lines";

pub struct FramedParser {
    http: HttpClient,
}

/// Where the receipt content lives relative to the fetched page.
#[derive(Debug, PartialEq)]
enum Content {
    Inline,
    Frame(Url),
}

impl FramedParser {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn locate(html: &str, page_url: &Url) -> Result<Content, ExtractionError> {
        let doc = Html::parse_document(html);

        if doc.select(&selector(LINES_TABLE)?).next().is_some() {
            return Ok(Content::Inline);
        }

        for css in FRAME_SELECTORS {
            let sel = selector(css)?;
            let src = doc
                .select(&sel)
                .filter_map(|el| el.value().attr("src"))
                .map(str::trim)
                .find(|src| !src.is_empty() && *src != "about:blank");

            if let Some(src) = src {
                let frame_url = page_url
                    .join(src)
                    .map_err(|e| ExtractionError::InvalidUrl(format!("{}: {}", src, e)))?;
                return Ok(Content::Frame(frame_url));
            }
        }

        Err(ExtractionError::MissingEmbeddedContent(page_url.to_string()))
    }

    /// Parse the receipt document.
    pub(crate) fn extract(html: &str) -> Result<ParsedReceipt, ExtractionError> {
        let doc = Html::parse_document(html);

        let header_info = ReceiptHeader {
            store_name: first_text(&doc, &selector(".issuer .name")?),
            receipt_date: first_text(&doc, &selector(".issue-date")?)
                .as_deref()
                .and_then(parse_receipt_date),
            total_amount: first_text(&doc, &selector(".total-amount")?)
                .as_deref()
                .and_then(parse_decimal)
                .map(round2),
            uid: first_text(&doc, &selector(".mark")?),
        };

        let row_sel = selector("table.lines tbody tr")?;
        let name_sel = selector(".description")?;
        let qty_sel = selector(".qty")?;
        let unit_sel = selector(".unit-price")?;
        let net_sel = selector(".net")?;
        let vat_amount_sel = selector(".vat-amount")?;
        let vat_rate_sel = selector(".vat-rate")?;

        let mut items = Vec::new();
        for (index, row) in doc.select(&row_sel).enumerate() {
            let name = child_text(row, &name_sel);
            let net_text = child_text(row, &net_sel);

            let (name, net_text) = match (name, net_text) {
                (None, None) => continue,
                (Some(name), Some(net)) => (name, net),
                (Some(name), None) => {
                    return Err(ExtractionError::Items(format!(
                        "row {} ({}) has no net value",
                        index + 1,
                        name
                    )))
                }
                (None, Some(_)) => {
                    return Err(ExtractionError::Items(format!(
                        "row {} has no description",
                        index + 1
                    )))
                }
            };

            let net = parse_decimal(&net_text).ok_or_else(|| {
                ExtractionError::Items(format!(
                    "row {} ({}) has unreadable net value '{}'",
                    index + 1,
                    name,
                    net_text
                ))
            })?;
            let vat = child_text(row, &vat_amount_sel)
                .as_deref()
                .and_then(parse_decimal)
                .unwrap_or(0.0);

            items.push(ParsedItem {
                name,
                quantity: child_text(row, &qty_sel)
                    .as_deref()
                    .and_then(parse_decimal)
                    .unwrap_or(1.0),
                price: round2(net + vat),
                unit_price: child_text(row, &unit_sel)
                    .as_deref()
                    .and_then(parse_decimal),
                vat_percentage: child_text(row, &vat_rate_sel)
                    .as_deref()
                    .and_then(parse_percentage),
            });
        }

        non_empty(ParsedReceipt { header_info, items })
    }
}

#[async_trait]
impl ReceiptParser for FramedParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Framed
    }

    async fn parse(&self, request: &ParseRequest<'_>) -> Result<ParsedReceipt, ExtractionError> {
        let page_url = Url::parse(request.url)
            .map_err(|e| ExtractionError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let page = match request.html_snapshot {
            Some(html) => html.to_string(),
            None => self.http.get_text(request.url, None).await?,
        };

        let receipt_html = match Self::locate(&page, &page_url)? {
            Content::Inline => page,
            Content::Frame(frame_url) => {
                debug!(
                    job_id = request.job_id.unwrap_or("-"),
                    "Following receipt frame {}", frame_url
                );
                self.http
                    .get_text(frame_url.as_str(), Some(request.url))
                    .await?
            }
        };

        Self::extract(&receipt_html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHELL: &str = r#"<html><body>
        <header>e-Apodeixi</header>
        <iframe id="receipt-frame" src="/view/abc123?lang=el"></iframe>
    </body></html>"#;

    const RECEIPT: &str = r#"<html><body>
        <div class="issuer"><span class="name">  ΣΚΛΑΒΕΝΙΤΗΣ  </span></div>
        <span class="issue-date">05/03/2024 14:22</span>
        <span class="mark">400001234567890</span>
        <table class="lines">
          <thead><tr><th>Περιγραφή</th></tr></thead>
          <tbody>
            <tr>
              <td class="description">Γάλα 1L</td><td class="qty">2,000</td>
              <td class="unit-price">5,00</td><td class="net">10,00</td>
              <td class="vat-amount">2,40</td><td class="vat-rate">24%</td>
            </tr>
            <tr><td colspan="6"></td></tr>
            <tr>
              <td class="description">Ψωμί</td><td class="qty">1</td>
              <td class="net">1,77</td><td class="vat-amount">0,23</td>
              <td class="vat-rate">13%</td>
            </tr>
          </tbody>
        </table>
        <span class="total-amount">14,40 €</span>
    </body></html>"#;

    #[test]
    fn test_extract_receipt_document() {
        let parsed = FramedParser::extract(RECEIPT).unwrap();

        assert_eq!(parsed.header_info.store_name.as_deref(), Some("ΣΚΛΑΒΕΝΙΤΗΣ"));
        assert_eq!(parsed.header_info.uid.as_deref(), Some("400001234567890"));
        assert_eq!(parsed.header_info.total_amount, Some(14.40));
        assert_eq!(
            parsed.header_info.receipt_date.unwrap().to_rfc3339(),
            "2024-03-05T00:00:00+00:00"
        );

        assert_eq!(parsed.items.len(), 2);
        let milk = &parsed.items[0];
        assert_eq!(milk.price, 12.40);
        assert_eq!(milk.quantity, 2.0);
        assert_eq!(milk.unit_price, Some(5.0));
        assert_eq!(milk.vat_percentage, Some(24.0));
        assert_eq!(parsed.items[1].price, 2.0);
        assert_eq!(parsed.items[1].unit_price, None);
    }

    #[test]
    fn test_unparsable_optional_fields_become_none() {
        let html = RECEIPT
            .replace("05/03/2024 14:22", "--")
            .replace("400001234567890", "");
        let parsed = FramedParser::extract(&html).unwrap();

        assert_eq!(parsed.header_info.receipt_date, None);
        assert_eq!(parsed.header_info.uid, None);
        assert_eq!(parsed.items.len(), 2);
    }

    #[test]
    fn test_bad_item_row_fails_whole_parse() {
        let html = RECEIPT.replace(r#"<td class="net">1,77</td>"#, r#"<td class="net">—</td>"#);
        assert!(matches!(
            FramedParser::extract(&html),
            Err(ExtractionError::Items(_))
        ));
    }

    #[test]
    fn test_obsolete_markup_is_empty() {
        let html = "<html><body><table class='lines'><tbody></tbody></table></body></html>";
        assert!(matches!(
            FramedParser::extract(html),
            Err(ExtractionError::Empty)
        ));
    }

    #[test]
    fn test_locate_frame() {
        let base = Url::parse("https://e-apodeixi.gr/r/abc123").unwrap();

        assert_eq!(
            FramedParser::locate(SHELL, &base).unwrap(),
            Content::Frame(Url::parse("https://e-apodeixi.gr/view/abc123?lang=el").unwrap())
        );
        assert_eq!(FramedParser::locate(RECEIPT, &base).unwrap(), Content::Inline);

        let blank = r#"<iframe src="about:blank"></iframe><p>Loading…</p>"#;
        assert!(matches!(
            FramedParser::locate(blank, &base),
            Err(ExtractionError::MissingEmbeddedContent(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_follows_frame() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SHELL))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/view/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RECEIPT))
            .expect(1)
            .mount(&server)
            .await;

        let parser = FramedParser::new(HttpClient::new(None, Duration::from_secs(5)).unwrap());
        let url = format!("{}/r/abc123", server.uri());
        let parsed = parser
            .parse(&ParseRequest::new(&url).with_job("job-1"))
            .await
            .unwrap();

        assert_eq!(parsed.items.len(), 2);
    }

    #[tokio::test]
    async fn test_parse_missing_frame_is_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/empty"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><p>Σφάλμα</p></html>"),
            )
            .mount(&server)
            .await;

        let parser = FramedParser::new(HttpClient::new(None, Duration::from_secs(5)).unwrap());
        let url = format!("{}/r/empty", server.uri());
        let err = parser.parse(&ParseRequest::new(&url)).await.unwrap_err();

        assert!(matches!(err, ExtractionError::MissingEmbeddedContent(_)));
    }
}
