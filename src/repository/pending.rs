//! Device-local pending scan queue.
//!
//! Two actors write here: the capture path (enqueue, delete on inline
//! success) and the sync reconciler (delete on confirmed delivery). Entries
//! are keyed by URL since they exist before any server id does.

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::pool::{DbError, DbPool, SqliteConn};
use super::records::{NewPendingScan, PendingScanRecord};
use super::{format_datetime, parse_datetime};
use crate::models::{CapturedScan, PendingScan};
use crate::schema::pending_scans;

impl From<PendingScanRecord> for PendingScan {
    fn from(record: PendingScanRecord) -> Self {
        PendingScan {
            id: record.id,
            url: record.url,
            html_snapshot: record.html_snapshot,
            user_id: record.user_id,
            captured_at: parse_datetime(&record.captured_at),
        }
    }
}

#[derive(Clone)]
pub struct PendingScanQueue {
    pool: DbPool,
}

impl PendingScanQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Stage a captured scan.
    ///
    /// A second capture of a queued URL collapses into the existing entry:
    /// the earliest capture time is kept, and a newly supplied snapshot or
    /// user replaces the stored one.
    pub async fn enqueue(&self, scan: &CapturedScan) -> Result<PendingScan, DbError> {
        let mut conn = self.pool.get().await?;
        let record = Self::upsert(&mut conn, scan.clone()).await?;
        debug!(url = %record.url, id = record.id, "scan queued");
        Ok(record.into())
    }

    async fn upsert(
        conn: &mut SqliteConn,
        scan: CapturedScan,
    ) -> Result<PendingScanRecord, DbError> {
        conn.transaction(|conn| {
            Box::pin(async move {
                let existing: Option<PendingScanRecord> = pending_scans::table
                    .filter(pending_scans::url.eq(&scan.url))
                    .first(conn)
                    .await
                    .optional()?;

                match existing {
                    Some(existing) => {
                        let snapshot = scan.html_snapshot.or(existing.html_snapshot);
                        let user_id = scan.user_id.or(existing.user_id);

                        diesel::update(pending_scans::table.find(existing.id))
                            .set((
                                pending_scans::html_snapshot.eq(snapshot),
                                pending_scans::user_id.eq(user_id),
                            ))
                            .execute(conn)
                            .await?;

                        pending_scans::table.find(existing.id).first(conn).await
                    }
                    None => {
                        let captured_at = format_datetime(&scan.captured_at);
                        diesel::insert_into(pending_scans::table)
                            .values(NewPendingScan {
                                url: &scan.url,
                                html_snapshot: scan.html_snapshot.as_deref(),
                                user_id: scan.user_id.as_deref(),
                                captured_at: &captured_at,
                            })
                            .execute(conn)
                            .await?;

                        pending_scans::table
                            .filter(pending_scans::url.eq(&scan.url))
                            .first(conn)
                            .await
                    }
                }
            })
        })
        .await
    }

    /// Remove a delivered scan by its natural key.
    pub async fn delete_by_url(&self, url: &str) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::delete(pending_scans::table.filter(pending_scans::url.eq(url)))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }

    pub async fn get_by_url(&self, url: &str) -> Result<Option<PendingScan>, DbError> {
        let mut conn = self.pool.get().await?;

        pending_scans::table
            .filter(pending_scans::url.eq(url))
            .first::<PendingScanRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(PendingScan::from))
    }

    /// Oldest captures first.
    pub async fn list(&self) -> Result<Vec<PendingScan>, DbError> {
        let mut conn = self.pool.get().await?;

        pending_scans::table
            .order((pending_scans::captured_at.asc(), pending_scans::id.asc()))
            .load::<PendingScanRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(PendingScan::from).collect())
    }

    pub async fn count(&self) -> Result<i64, DbError> {
        let mut conn = self.pool.get().await?;

        pending_scans::table.count().get_result(&mut conn).await
    }
}
