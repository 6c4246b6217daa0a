//! Database context for managing the connection pool and repository access.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::jobs::JobLedger;
use super::pending::PendingScanQueue;
use super::pool::{DbError, DbPool};
use super::receipts::ReceiptRepository;
use super::scans::ScanRepository;

/// Server-side tables.
const SERVER_SCHEMA: &str = r#"
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS scanned_urls (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        user_id TEXT NOT NULL,
        html_snapshot TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(user_id, url)
    );

    -- One job per scanned URL. This index is the idempotency boundary
    -- for duplicate event delivery.
    CREATE TABLE IF NOT EXISTS processing_jobs (
        id TEXT PRIMARY KEY,
        scanned_url_id TEXT NOT NULL UNIQUE REFERENCES scanned_urls(id),
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 1,
        last_attempted_at TEXT,
        error_message TEXT,
        error_kind TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_processing_jobs_status ON processing_jobs(status);

    CREATE TABLE IF NOT EXISTS receipts (
        id TEXT PRIMARY KEY,
        scanned_url_id TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL,
        receipt_date TEXT,
        total_amount REAL,
        store_name TEXT,
        uid TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_receipts_user ON receipts(user_id);

    CREATE TABLE IF NOT EXISTS receipt_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        receipt_id TEXT NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        quantity REAL NOT NULL,
        price REAL NOT NULL,
        unit_price REAL,
        vat_percentage REAL
    );
    CREATE INDEX IF NOT EXISTS idx_receipt_items_receipt ON receipt_items(receipt_id);
"#;

/// Device-side queue table. The URL is the natural key.
const DEVICE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS pending_scans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL UNIQUE,
        html_snapshot TEXT,
        user_id TEXT,
        captured_at TEXT NOT NULL
    );
"#;

/// Manages the connection pool and hands out repositories.
///
/// Create one context per command or service, then use it to access the
/// repositories it needs.
#[derive(Clone, Debug)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context for an SQLite file.
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: DbPool::from_path(db_path),
        }
    }

    /// Create a context from a database URL (`sqlite:` prefix optional).
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: DbPool::new(database_url),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn scans(&self) -> ScanRepository {
        ScanRepository::new(self.pool.clone())
    }

    pub fn jobs(&self) -> JobLedger {
        JobLedger::new(self.pool.clone())
    }

    pub fn receipts(&self) -> ReceiptRepository {
        ReceiptRepository::new(self.pool.clone())
    }

    pub fn pending(&self) -> PendingScanQueue {
        PendingScanQueue::new(self.pool.clone())
    }

    /// Create the server tables if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(SERVER_SCHEMA).await
    }

    /// Create the device queue table if it doesn't exist.
    pub async fn init_device_schema(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(DEVICE_SCHEMA).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("server.db"));

        ctx.init_schema().await.unwrap();
        ctx.init_schema().await.unwrap();

        let device = DbContext::new(&dir.path().join("device.db"));
        device.init_device_schema().await.unwrap();
        device.init_device_schema().await.unwrap();
    }
}
