//! Processing job models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ledger state of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of the error recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoParser,
    Extraction,
    MissingRenderedContent,
    Persistence,
    PartialWrite,
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoParser => "no_parser",
            Self::Extraction => "extraction",
            Self::MissingRenderedContent => "missing_rendered_content",
            Self::Persistence => "persistence",
            Self::PartialWrite => "partial_write",
            Self::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "no_parser" => Some(Self::NoParser),
            "extraction" => Some(Self::Extraction),
            "missing_rendered_content" => Some(Self::MissingRenderedContent),
            "persistence" => Some(Self::Persistence),
            "partial_write" => Some(Self::PartialWrite),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// A job untouched in `processing` for longer than this is reported stuck.
pub const STUCK_AFTER_MINUTES: i64 = 10;

/// One attempt lifecycle for a scanned URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: String,
    pub scanned_url_id: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// A failed job may be re-claimed only after a network timeout and while
    /// it has attempts left.
    pub fn can_retry(&self, max_attempts: i32) -> bool {
        self.status == JobStatus::Failed
            && self.error_kind == Some(FailureKind::Timeout)
            && self.attempts < max_attempts
    }

    /// Still `processing` long after its last update, as when a worker died
    /// or could not record completion.
    pub fn is_stuck(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && now - self.updated_at > Duration::minutes(STUCK_AFTER_MINUTES)
    }

    /// Failed only because the page needed a device-rendered snapshot.
    pub fn awaits_snapshot(&self) -> bool {
        self.status == JobStatus::Failed
            && self.error_kind == Some(FailureKind::MissingRenderedContent)
    }
}
