//! Repository layer for database persistence.
//!
//! All database access uses Diesel with the async `SyncConnectionWrapper`
//! over SQLite. The server database holds scans, jobs and receipts; the
//! device database holds only the pending scan queue.

pub mod context;
pub mod jobs;
pub mod pending;
pub mod pool;
pub mod receipts;
pub mod records;
pub mod scans;
pub mod util;

pub use context::DbContext;
pub use jobs::{CreateOutcome, JobLedger, LedgerError};
pub use pending::PendingScanQueue;
pub use pool::{DbError, DbPool};
pub use receipts::{ReceiptRepository, ReceiptStore};
pub use scans::ScanRepository;

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Format a datetime for storage. Millisecond precision keeps text ordering
/// consistent with time ordering.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
