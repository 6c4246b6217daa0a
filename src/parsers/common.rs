//! Text, number and date normalization shared by all parsers.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::ExtractionError;

/// First numeric token, allowing `.`/`,` grouping and a leading minus.
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d.,]*").expect("valid number regex"));

/// Day-month-year with `/`, `.` or `-` separators, not embedded in a longer number.
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{1,2})\s*[./-]\s*(\d{1,2})\s*[./-]\s*(\d{2,4})(?:\D|$)")
        .expect("valid date regex")
});

/// Thousands grouping with dots only, e.g. `1.234` or `12.345.678`.
static DOT_GROUPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d{1,3}(\.\d{3})+$").expect("valid grouping regex"));

/// Parse a CSS selector, mapping failures to an extraction error.
pub fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Selector(format!("{}: {:?}", css, e)))
}

/// Collapse runs of whitespace and trim.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of an element, cleaned. `None` when empty.
pub fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = clean_text(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// Cleaned text of the first match of `sel` in the document.
pub fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel).next().and_then(element_text)
}

/// Cleaned text of the first match of `sel` under `element`.
pub fn child_text(element: ElementRef<'_>, sel: &Selector) -> Option<String> {
    element.select(sel).next().and_then(element_text)
}

/// Parse a locale-formatted amount.
///
/// A comma is the decimal separator and dots group thousands
/// (`1.234,56` is 1234.56). Without a comma, a dot is a decimal point
/// unless it only separates groups of three digits. Currency symbols
/// and surrounding text are ignored.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let token = NUMBER_RE.find(text)?.as_str();
    let token = token.trim_end_matches(['.', ',']);

    let normalized = if token.contains(',') {
        token.replace('.', "").replace(',', ".")
    } else if DOT_GROUPED_RE.is_match(token) {
        token.replace('.', "")
    } else {
        token.to_string()
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a percentage such as `24%` or `13,00 %`.
pub fn parse_percentage(text: &str) -> Option<f64> {
    parse_decimal(text)
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse a day-month-year date and pin it to UTC midnight.
///
/// Two-digit years are taken as 20xx. Any time of day in the input is
/// dropped so the calendar date never shifts across timezones.
pub fn parse_receipt_date(text: &str) -> Option<DateTime<Utc>> {
    let caps = DATE_RE.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let mut year: i32 = caps[3].parse().ok()?;
    if caps[3].len() == 2 {
        year += 2000;
    } else if caps[3].len() != 4 {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, SecondsFormat, Timelike};

    #[test]
    fn test_parse_decimal_locales() {
        assert_eq!(parse_decimal("12,40"), Some(12.40));
        assert_eq!(parse_decimal("1.234,56 €"), Some(1234.56));
        assert_eq!(parse_decimal("€ 3.50"), Some(3.50));
        assert_eq!(parse_decimal("1.234"), Some(1234.0));
        assert_eq!(parse_decimal("Σύνολο: 7,00"), Some(7.0));
        assert_eq!(parse_decimal("-0,50"), Some(-0.5));
        assert_eq!(parse_decimal("2."), Some(2.0));
        assert_eq!(parse_decimal("n/a"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn test_round2_net_plus_vat() {
        assert_eq!(round2(10.00 + 2.40), 12.40);
        assert_eq!(round2(0.1 + 0.2), 0.3);
        assert_eq!(format!("{:.2}", round2(1.005 + 0.0)), "1.00");
    }

    #[test]
    fn test_parse_receipt_date_is_utc_midnight() {
        let dt = parse_receipt_date("05/03/2024 23:45").unwrap();
        assert_eq!((dt.day(), dt.month(), dt.year()), (5, 3, 2024));
        assert_eq!(dt.hour(), 0);
        assert_eq!(
            dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            "2024-03-05T00:00:00.000Z"
        );

        assert_eq!(parse_receipt_date("5.3.24").unwrap().year(), 2024);
        assert_eq!(parse_receipt_date("31-12-2023").unwrap().month(), 12);
    }

    #[test]
    fn test_parse_receipt_date_rejects_garbage() {
        assert_eq!(parse_receipt_date("31/02/2024"), None);
        assert_eq!(parse_receipt_date("13/13/2024"), None);
        assert_eq!(parse_receipt_date("tomorrow"), None);
        assert_eq!(parse_receipt_date("01/02/202"), None);
        // Year-first input is not day-month-year
        assert_eq!(parse_receipt_date("2024-03-05"), None);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Γάλα \n  1L  "), "Γάλα 1L");
    }
}
