//! Scanned URLs and the event that announces them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Event type emitted when a scanned URL row is inserted.
pub const INSERT_EVENT: &str = "INSERT";

/// A URL submitted by a user after scanning a receipt QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedUrl {
    pub id: String,
    pub url: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_snapshot: Option<String>,
}

/// Submission body for a new scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScan {
    pub url: String,
    #[serde(alias = "user_id")]
    pub user_id: String,
    #[serde(default, alias = "html_snapshot", skip_serializing_if = "Option::is_none")]
    pub html_snapshot: Option<String>,
}

impl NewScan {
    /// Reject submissions without an http(s) URL or a user.
    pub fn validate(&self) -> Result<(), String> {
        check_url(self.url.trim())?;
        if self.user_id.trim().is_empty() {
            return Err("missing user id".to_string());
        }
        Ok(())
    }
}

/// Server confirmation that a submitted scan is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub scanned_url_id: String,
    /// The same user had already submitted this URL.
    pub already_exists: bool,
    /// An ingestion event was queued for this submission.
    #[serde(default)]
    pub dispatched: bool,
}

fn check_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid url '{}': {}", url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported url scheme '{}'", parsed.scheme()));
    }
    Ok(())
}

/// Delivery payload: `{type, record}`.
///
/// Everything is optional at the wire level so that malformed events can be
/// acknowledged and dropped instead of being rejected by the deserializer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanEvent {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub record: Option<ScanEventRecord>,
}

/// Record carried by a [`ScanEvent`]. Accepts camelCase and snake_case keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEventRecord {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(default, alias = "html_snapshot")]
    pub html_snapshot: Option<String>,
}

/// A validated scan event, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub scanned_url_id: String,
    pub url: String,
    pub user_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub html_snapshot: Option<String>,
}

impl ScanEvent {
    /// Build the insert event for a stored scan.
    pub fn insert(scan: &ScannedUrl) -> Self {
        Self {
            event_type: Some(INSERT_EVENT.to_string()),
            record: Some(ScanEventRecord {
                id: Some(serde_json::Value::String(scan.id.clone())),
                url: Some(scan.url.clone()),
                user_id: Some(scan.user_id.clone()),
                created_at: Some(scan.created_at.to_rfc3339()),
                html_snapshot: scan.html_snapshot.clone(),
            }),
        }
    }

    /// Check the event shape and extract the fields the pipeline needs.
    pub fn validate(&self) -> Result<ScanRequest, String> {
        match self.event_type.as_deref() {
            Some(INSERT_EVENT) => {}
            Some(other) => return Err(format!("unsupported event type '{}'", other)),
            None => return Err("missing event type".to_string()),
        }

        let record = self.record.as_ref().ok_or("missing record")?;

        let scanned_url_id = match &record.id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err("missing record id".to_string()),
        };

        let url = record
            .url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("missing record url")?;
        check_url(url)?;

        let user_id = record
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("missing record user id")?;

        let created_at = record.created_at.as_deref().and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        Ok(ScanRequest {
            scanned_url_id,
            url: url.to_string(),
            user_id: user_id.to_string(),
            created_at,
            html_snapshot: record.html_snapshot.clone().filter(|s| !s.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: serde_json::Value) -> ScanEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_validate_camel_case_event() {
        let ev = event(serde_json::json!({
            "type": "INSERT",
            "record": {
                "id": "scan-1",
                "url": "https://e-apodeixi.gr/r/abc",
                "userId": "user-1",
                "createdAt": "2024-03-05T10:00:00Z",
                "htmlSnapshot": "<html></html>"
            }
        }));

        let req = ev.validate().unwrap();
        assert_eq!(req.scanned_url_id, "scan-1");
        assert_eq!(req.user_id, "user-1");
        assert!(req.created_at.is_some());
        assert_eq!(req.html_snapshot.as_deref(), Some("<html></html>"));
    }

    #[test]
    fn test_validate_snake_case_and_numeric_id() {
        let ev = event(serde_json::json!({
            "type": "INSERT",
            "record": { "id": 42, "url": "https://e-apodeixi.gr/r/abc", "user_id": "u" }
        }));

        let req = ev.validate().unwrap();
        assert_eq!(req.scanned_url_id, "42");
        assert_eq!(req.html_snapshot, None);
    }

    #[test]
    fn test_validate_rejects_other_types_and_missing_fields() {
        let update = event(serde_json::json!({
            "type": "UPDATE",
            "record": { "id": "a", "url": "https://x.gr", "userId": "u" }
        }));
        assert!(update.validate().is_err());

        let no_user = event(serde_json::json!({
            "type": "INSERT",
            "record": { "id": "a", "url": "https://x.gr" }
        }));
        assert!(no_user.validate().is_err());

        let bad_url = event(serde_json::json!({
            "type": "INSERT",
            "record": { "id": "a", "url": "not a url", "userId": "u" }
        }));
        assert!(bad_url.validate().is_err());

        assert!(ScanEvent::default().validate().is_err());
    }

    #[test]
    fn test_insert_event_round_trips_through_validate() {
        let scan = ScannedUrl {
            id: "s1".to_string(),
            url: "https://e-apodeixi.gr/r/1".to_string(),
            user_id: "u1".to_string(),
            created_at: Utc::now(),
            html_snapshot: None,
        };

        let req = ScanEvent::insert(&scan).validate().unwrap();
        assert_eq!(req.scanned_url_id, "s1");
        assert_eq!(req.url, scan.url);
    }
}
