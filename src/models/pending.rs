//! Device-local pending scans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scan held on the device until the server confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingScan {
    pub id: i32,
    pub url: String,
    pub html_snapshot: Option<String>,
    pub user_id: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// What the capture path hands to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedScan {
    pub url: String,
    pub html_snapshot: Option<String>,
    pub user_id: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedScan {
    pub fn new(url: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            url: url.into(),
            html_snapshot: None,
            user_id,
            captured_at: Utc::now(),
        }
    }

    pub fn with_snapshot(mut self, html: Option<String>) -> Self {
        self.html_snapshot = html.filter(|s| !s.trim().is_empty());
        self
    }
}
