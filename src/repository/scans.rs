//! Scanned URL repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{DbError, DbPool};
use super::records::{NewScannedUrl, ScannedUrlRecord};
use super::{format_datetime, parse_datetime};
use crate::models::{NewScan, ScannedUrl};
use crate::schema::scanned_urls;

impl From<ScannedUrlRecord> for ScannedUrl {
    fn from(record: ScannedUrlRecord) -> Self {
        ScannedUrl {
            id: record.id,
            url: record.url,
            user_id: record.user_id,
            created_at: parse_datetime(&record.created_at),
            html_snapshot: record.html_snapshot,
        }
    }
}

#[derive(Clone)]
pub struct ScanRepository {
    pool: DbPool,
}

impl ScanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a scan unless the same user already submitted the same URL.
    ///
    /// Returns the stored row and whether it was created by this call.
    pub async fn insert(&self, scan: &NewScan) -> Result<(ScannedUrl, bool), DbError> {
        let mut conn = self.pool.get().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = format_datetime(&Utc::now());

        let rows = diesel::insert_or_ignore_into(scanned_urls::table)
            .values(NewScannedUrl {
                id: &id,
                url: &scan.url,
                user_id: &scan.user_id,
                html_snapshot: scan.html_snapshot.as_deref(),
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        let record = scanned_urls::table
            .filter(scanned_urls::user_id.eq(&scan.user_id))
            .filter(scanned_urls::url.eq(&scan.url))
            .first::<ScannedUrlRecord>(&mut conn)
            .await?;

        Ok((ScannedUrl::from(record), rows == 1))
    }

    /// Replace the stored snapshot of a scan, returning the updated row.
    pub async fn attach_snapshot(
        &self,
        id: &str,
        snapshot: &str,
    ) -> Result<Option<ScannedUrl>, DbError> {
        let mut conn = self.pool.get().await?;

        diesel::update(scanned_urls::table.find(id))
            .set(scanned_urls::html_snapshot.eq(Some(snapshot)))
            .execute(&mut conn)
            .await?;

        scanned_urls::table
            .find(id)
            .first::<ScannedUrlRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(ScannedUrl::from))
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScannedUrl>, DbError> {
        let mut conn = self.pool.get().await?;

        scanned_urls::table
            .find(id)
            .first::<ScannedUrlRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(ScannedUrl::from))
    }

    pub async fn count(&self) -> Result<i64, DbError> {
        let mut conn = self.pool.get().await?;

        scanned_urls::table
            .count()
            .get_result(&mut conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;

    #[tokio::test]
    async fn test_insert_is_idempotent_per_user_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("scans.db"));
        ctx.init_schema().await.unwrap();
        let repo = ctx.scans();

        let scan = NewScan {
            url: "https://e-apodeixi.gr/r/1".to_string(),
            user_id: "alice".to_string(),
            html_snapshot: None,
        };

        let (first, created) = repo.insert(&scan).await.unwrap();
        assert!(created);

        let (second, created) = repo.insert(&scan).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let other_user = NewScan {
            user_id: "bob".to_string(),
            ..scan
        };
        let (third, created) = repo.insert(&other_user).await.unwrap();
        assert!(created);
        assert_ne!(third.id, first.id);

        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.get(&first.id).await.unwrap().unwrap().user_id, "alice");
    }

    #[tokio::test]
    async fn test_attach_snapshot_to_existing_scan() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("scans.db"));
        ctx.init_schema().await.unwrap();
        let repo = ctx.scans();

        let (scan, _) = repo
            .insert(&NewScan {
                url: "https://www.impact.gr/v/9".to_string(),
                user_id: "alice".to_string(),
                html_snapshot: None,
            })
            .await
            .unwrap();
        assert!(scan.html_snapshot.is_none());

        let updated = repo
            .attach_snapshot(&scan.id, "<div>rendered</div>")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, scan.id);
        assert_eq!(updated.html_snapshot.as_deref(), Some("<div>rendered</div>"));

        assert!(repo.attach_snapshot("missing", "x").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
