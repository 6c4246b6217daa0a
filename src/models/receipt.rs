//! Parsed and persisted receipt models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header fields recovered from a receipt page. All optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptHeader {
    pub store_name: Option<String>,
    pub receipt_date: Option<DateTime<Utc>>,
    pub total_amount: Option<f64>,
    pub uid: Option<String>,
}

impl ReceiptHeader {
    pub fn is_empty(&self) -> bool {
        self.store_name.is_none()
            && self.receipt_date.is_none()
            && self.total_amount.is_none()
            && self.uid.is_none()
    }
}

/// A line item. `price` is the line total, not the unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedItem {
    pub name: String,
    pub quantity: f64,
    pub price: f64,
    pub unit_price: Option<f64>,
    pub vat_percentage: Option<f64>,
}

/// Parser output, consumed once by the persistence writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReceipt {
    pub header_info: ReceiptHeader,
    pub items: Vec<ParsedItem>,
}

impl ParsedReceipt {
    /// No items and no header fields: the selector set no longer matches the page.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.header_info.is_empty()
    }

    pub fn items_total(&self) -> f64 {
        self.items.iter().map(|i| i.price).sum()
    }
}

/// Persisted receipt header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    pub scanned_url_id: String,
    pub user_id: String,
    pub receipt_date: Option<DateTime<Utc>>,
    pub total_amount: Option<f64>,
    pub store_name: Option<String>,
    pub uid: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    pub id: i32,
    pub receipt_id: String,
    pub name: String,
    pub quantity: f64,
    pub price: f64,
    pub unit_price: Option<f64>,
    pub vat_percentage: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_receipt() {
        assert!(ParsedReceipt::default().is_empty());

        let header_only = ParsedReceipt {
            header_info: ReceiptHeader {
                store_name: Some("Kiosk".into()),
                ..Default::default()
            },
            items: vec![],
        };
        assert!(!header_only.is_empty());
    }

    #[test]
    fn test_serializes_with_header_info_key() {
        let json = serde_json::to_value(ParsedReceipt::default()).unwrap();
        assert!(json.get("headerInfo").is_some());
        assert!(json["headerInfo"].get("storeName").is_some());
    }
}
