//! Job ledger: one processing job per scanned URL.
//!
//! The unique index on `processing_jobs.scanned_url_id` is the only
//! synchronization point between concurrent deliveries of the same event.
//! Every transition is a conditional update on the current status, so two
//! racing callers can never both move the same row.

use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::pool::{DbError, DbPool, SqliteConn};
use super::records::{NewProcessingJob, ProcessingJobRecord};
use super::util::{is_foreign_key_violation, is_unique_violation, truncate_chars};
use super::{format_datetime, parse_datetime, parse_datetime_opt};
use crate::models::{FailureKind, JobStatus, ProcessingJob};
use crate::schema::processing_jobs;

/// Longest error message stored on a job.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Scanned URL not found: {0}")]
    UnknownScan(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Result of [`JobLedger::create`].
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(ProcessingJob),
    /// A job already exists for this scan: in flight or done.
    AlreadyExists(ProcessingJob),
}

impl From<ProcessingJobRecord> for ProcessingJob {
    fn from(record: ProcessingJobRecord) -> Self {
        ProcessingJob {
            id: record.id,
            scanned_url_id: record.scanned_url_id,
            status: JobStatus::from_str(&record.status).unwrap_or(JobStatus::Failed),
            attempts: record.attempts,
            last_attempted_at: parse_datetime_opt(record.last_attempted_at),
            error_message: record.error_message,
            error_kind: record.error_kind.as_deref().and_then(FailureKind::from_str),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct JobLedger {
    pool: DbPool,
}

impl JobLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a `pending` job with `attempts = 1`, or report the existing one.
    pub async fn create(&self, scanned_url_id: &str) -> Result<CreateOutcome, LedgerError> {
        let mut conn = self.pool.get().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = format_datetime(&Utc::now());

        let inserted = diesel::insert_into(processing_jobs::table)
            .values(NewProcessingJob {
                id: &id,
                scanned_url_id,
                status: JobStatus::Pending.as_str(),
                attempts: 1,
                created_at: &now,
                updated_at: &now,
            })
            .execute(&mut conn)
            .await;

        match inserted {
            Ok(_) => {
                info!(job_id = %id, scanned_url_id, "job created");
                let job = Self::load(&mut conn, &id).await?;
                Ok(CreateOutcome::Created(job))
            }
            Err(e) if is_unique_violation(&e) => {
                let existing = processing_jobs::table
                    .filter(processing_jobs::scanned_url_id.eq(scanned_url_id))
                    .first::<ProcessingJobRecord>(&mut conn)
                    .await?;
                debug!(
                    job_id = %existing.id,
                    scanned_url_id,
                    status = %existing.status,
                    "job already exists"
                );
                Ok(CreateOutcome::AlreadyExists(existing.into()))
            }
            Err(e) if is_foreign_key_violation(&e) => {
                Err(LedgerError::UnknownScan(scanned_url_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `pending -> processing`, recording the attempt time.
    pub async fn mark_processing(&self, job_id: &str) -> Result<ProcessingJob, LedgerError> {
        let mut conn = self.pool.get().await?;
        let now = format_datetime(&Utc::now());

        let rows = diesel::update(
            processing_jobs::table
                .filter(processing_jobs::id.eq(job_id))
                .filter(processing_jobs::status.eq(JobStatus::Pending.as_str())),
        )
        .set((
            processing_jobs::status.eq(JobStatus::Processing.as_str()),
            processing_jobs::last_attempted_at.eq(Some(&now)),
            processing_jobs::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        if rows == 0 {
            return Err(Self::rejected(&mut conn, job_id, JobStatus::Processing).await);
        }

        let job = Self::load(&mut conn, job_id).await?;
        info!(job_id, scanned_url_id = %job.scanned_url_id, "job processing");
        Ok(job)
    }

    /// `processing -> completed`.
    pub async fn complete(&self, job_id: &str) -> Result<ProcessingJob, LedgerError> {
        let mut conn = self.pool.get().await?;
        let now = format_datetime(&Utc::now());

        let rows = diesel::update(
            processing_jobs::table
                .filter(processing_jobs::id.eq(job_id))
                .filter(processing_jobs::status.eq(JobStatus::Processing.as_str())),
        )
        .set((
            processing_jobs::status.eq(JobStatus::Completed.as_str()),
            processing_jobs::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        if rows == 0 {
            return Err(Self::rejected(&mut conn, job_id, JobStatus::Completed).await);
        }

        let job = Self::load(&mut conn, job_id).await?;
        info!(job_id, scanned_url_id = %job.scanned_url_id, "job completed");
        Ok(job)
    }

    /// `pending | processing -> failed`, recording a truncated cause.
    ///
    /// Only overwrites the error fields; nothing is cleared.
    pub async fn fail(
        &self,
        job_id: &str,
        kind: FailureKind,
        message: &str,
    ) -> Result<ProcessingJob, LedgerError> {
        let mut conn = self.pool.get().await?;
        let now = format_datetime(&Utc::now());
        let message = truncate_chars(message, MAX_ERROR_MESSAGE_CHARS);

        let rows = diesel::update(
            processing_jobs::table
                .filter(processing_jobs::id.eq(job_id))
                .filter(processing_jobs::status.eq_any(vec![
                    JobStatus::Pending.as_str(),
                    JobStatus::Processing.as_str(),
                ])),
        )
        .set((
            processing_jobs::status.eq(JobStatus::Failed.as_str()),
            processing_jobs::error_message.eq(Some(&message)),
            processing_jobs::error_kind.eq(Some(kind.as_str())),
            processing_jobs::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        if rows == 0 {
            return Err(Self::rejected(&mut conn, job_id, JobStatus::Failed).await);
        }

        let job = Self::load(&mut conn, job_id).await?;
        warn!(
            job_id,
            scanned_url_id = %job.scanned_url_id,
            kind = kind.as_str(),
            error = %message,
            "job failed"
        );
        Ok(job)
    }

    /// Re-claim a job that failed on a network timeout: `failed -> processing`
    /// on the same row with `attempts + 1`.
    ///
    /// Returns `None` when the job is not retryable or another caller won.
    pub async fn retry(
        &self,
        job_id: &str,
        max_attempts: i32,
    ) -> Result<Option<ProcessingJob>, LedgerError> {
        let mut conn = self.pool.get().await?;
        let now = format_datetime(&Utc::now());

        let rows = diesel::update(
            processing_jobs::table
                .filter(processing_jobs::id.eq(job_id))
                .filter(processing_jobs::status.eq(JobStatus::Failed.as_str()))
                .filter(processing_jobs::error_kind.eq(FailureKind::Timeout.as_str()))
                .filter(processing_jobs::attempts.lt(max_attempts)),
        )
        .set((
            processing_jobs::status.eq(JobStatus::Processing.as_str()),
            processing_jobs::attempts.eq(processing_jobs::attempts + 1),
            processing_jobs::last_attempted_at.eq(Some(&now)),
            processing_jobs::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        if rows == 0 {
            return Ok(None);
        }

        let job = Self::load(&mut conn, job_id).await?;
        info!(
            job_id,
            scanned_url_id = %job.scanned_url_id,
            attempt = job.attempts,
            "job retrying"
        );
        Ok(Some(job))
    }

    /// Re-claim a job that failed for lack of rendered content once a
    /// snapshot has arrived: `failed -> processing` with `attempts + 1`.
    ///
    /// Not bounded by the attempt limit; each reopen follows a new scan.
    /// Returns `None` when the job is not waiting on a snapshot or another
    /// caller won.
    pub async fn reopen(&self, job_id: &str) -> Result<Option<ProcessingJob>, LedgerError> {
        let mut conn = self.pool.get().await?;
        let now = format_datetime(&Utc::now());

        let rows = diesel::update(
            processing_jobs::table
                .filter(processing_jobs::id.eq(job_id))
                .filter(processing_jobs::status.eq(JobStatus::Failed.as_str()))
                .filter(
                    processing_jobs::error_kind
                        .eq(FailureKind::MissingRenderedContent.as_str()),
                ),
        )
        .set((
            processing_jobs::status.eq(JobStatus::Processing.as_str()),
            processing_jobs::attempts.eq(processing_jobs::attempts + 1),
            processing_jobs::last_attempted_at.eq(Some(&now)),
            processing_jobs::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        if rows == 0 {
            return Ok(None);
        }

        let job = Self::load(&mut conn, job_id).await?;
        info!(
            job_id,
            scanned_url_id = %job.scanned_url_id,
            attempt = job.attempts,
            "job reopened with snapshot"
        );
        Ok(Some(job))
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>, DbError> {
        let mut conn = self.pool.get().await?;

        processing_jobs::table
            .find(job_id)
            .first::<ProcessingJobRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(ProcessingJob::from))
    }

    pub async fn get_by_scanned_url(
        &self,
        scanned_url_id: &str,
    ) -> Result<Option<ProcessingJob>, DbError> {
        let mut conn = self.pool.get().await?;

        processing_jobs::table
            .filter(processing_jobs::scanned_url_id.eq(scanned_url_id))
            .first::<ProcessingJobRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(ProcessingJob::from))
    }

    /// Most recently created jobs first.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<ProcessingJob>, DbError> {
        let mut conn = self.pool.get().await?;

        let mut query = processing_jobs::table
            .order(processing_jobs::created_at.desc())
            .limit(limit)
            .into_boxed();

        if let Some(status) = status {
            query = query.filter(processing_jobs::status.eq(status.as_str()));
        }

        query
            .load::<ProcessingJobRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(ProcessingJob::from).collect())
    }

    pub async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>, DbError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(String, i64)> = processing_jobs::table
            .group_by(processing_jobs::status)
            .select((processing_jobs::status, count_star()))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(status, count)| JobStatus::from_str(&status).map(|s| (s, count)))
            .collect())
    }

    async fn load(conn: &mut SqliteConn, job_id: &str) -> Result<ProcessingJob, LedgerError> {
        processing_jobs::table
            .find(job_id)
            .first::<ProcessingJobRecord>(conn)
            .await
            .optional()?
            .map(ProcessingJob::from)
            .ok_or_else(|| LedgerError::NotFound(job_id.to_string()))
    }

    /// Explain why a conditional update touched no rows.
    async fn rejected(conn: &mut SqliteConn, job_id: &str, to: JobStatus) -> LedgerError {
        match Self::load(conn, job_id).await {
            Ok(job) => LedgerError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status,
                to,
            },
            Err(e) => e,
        }
    }
}
