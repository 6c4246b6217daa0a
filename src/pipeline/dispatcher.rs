//! Ingestion dispatcher: one invocation per scan event.
//!
//! Every failure past validation is recorded on the job row and folded
//! into an [`Ack`]. Only network timeouts with attempts left ask the event
//! source for redelivery.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::error::IngestError;
use super::writer::PersistenceWriter;
use crate::models::{FailureKind, ProcessingJob, ScanEvent, ScanRequest};
use crate::parsers::{ExtractionError, ParseRequest, ParserRegistry, ParserSet};
use crate::repository::{CreateOutcome, JobLedger, LedgerError};

/// Default bound on attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Tries at marking a job completed after its receipt is stored.
const COMPLETE_ATTEMPTS: u32 = 2;

const COMPLETE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Outcome reported to the event source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Ack {
    /// Malformed or unknown event; dropped without creating a job.
    Ignored { reason: String },
    /// A job already exists for this scan.
    Duplicate { job_id: String },
    Completed { job_id: String, receipt_id: String },
    /// Recorded on the job; redelivery would not help.
    Failed {
        job_id: String,
        kind: FailureKind,
        message: String,
    },
    /// Infrastructure failure; the event should be delivered again.
    Retry {
        job_id: Option<String>,
        message: String,
    },
}

impl Ack {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Ack::Retry { .. })
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Ack::Ignored { .. } => None,
            Ack::Duplicate { job_id }
            | Ack::Completed { job_id, .. }
            | Ack::Failed { job_id, .. } => Some(job_id),
            Ack::Retry { job_id, .. } => job_id.as_deref(),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    ledger: JobLedger,
    registry: Arc<ParserRegistry>,
    parsers: Arc<ParserSet>,
    writer: PersistenceWriter,
    max_attempts: i32,
}

impl Dispatcher {
    pub fn new(
        ledger: JobLedger,
        registry: Arc<ParserRegistry>,
        parsers: Arc<ParserSet>,
        writer: PersistenceWriter,
    ) -> Self {
        Self {
            ledger,
            registry,
            parsers,
            writer,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub async fn handle(&self, event: &ScanEvent) -> Ack {
        let request = match event.validate() {
            Ok(request) => request,
            Err(reason) => {
                let err = IngestError::Validation(reason);
                warn!("Ignoring scan event: {}", err);
                return Ack::Ignored {
                    reason: err.to_string(),
                };
            }
        };

        let job = match self.claim(&request).await {
            Ok(job) => job,
            Err(ack) => return ack,
        };

        match self.process(&job, &request).await {
            Ok(receipt_id) => {
                self.finish(&job.id).await;
                Ack::Completed {
                    job_id: job.id,
                    receipt_id,
                }
            }
            Err(err) => self.record_failure(&job, err).await,
        }
    }

    /// Create the job and move it to `processing`, or explain why this
    /// delivery has nothing to do.
    async fn claim(&self, request: &ScanRequest) -> Result<ProcessingJob, Ack> {
        let scanned_url_id = request.scanned_url_id.as_str();

        match self.ledger.create(scanned_url_id).await {
            Ok(CreateOutcome::Created(job)) => self
                .ledger
                .mark_processing(&job.id)
                .await
                .map_err(|e| ledger_ack(Some(job.id.clone()), e)),
            Ok(CreateOutcome::AlreadyExists(job)) if job.can_retry(self.max_attempts) => {
                match self.ledger.retry(&job.id, self.max_attempts).await {
                    Ok(Some(job)) => Ok(job),
                    Ok(None) => Err(Ack::Duplicate { job_id: job.id }),
                    Err(e) => Err(ledger_ack(Some(job.id), e)),
                }
            }
            Ok(CreateOutcome::AlreadyExists(job))
                if request.html_snapshot.is_some() && job.awaits_snapshot() =>
            {
                match self.ledger.reopen(&job.id).await {
                    Ok(Some(job)) => Ok(job),
                    Ok(None) => Err(Ack::Duplicate { job_id: job.id }),
                    Err(e) => Err(ledger_ack(Some(job.id), e)),
                }
            }
            Ok(CreateOutcome::AlreadyExists(job)) => {
                let err = IngestError::DuplicateJob(scanned_url_id.to_string());
                debug!(job_id = %job.id, status = %job.status, "{}", err);
                Err(Ack::Duplicate { job_id: job.id })
            }
            Err(LedgerError::UnknownScan(id)) => {
                let err = IngestError::Validation(format!("unknown scanned url {}", id));
                warn!("Ignoring scan event: {}", err);
                Err(Ack::Ignored {
                    reason: err.to_string(),
                })
            }
            Err(e) => Err(ledger_ack(None, e)),
        }
    }

    async fn process(
        &self,
        job: &ProcessingJob,
        request: &ScanRequest,
    ) -> Result<String, IngestError> {
        let kind = self
            .registry
            .resolve(&request.url)
            .map_err(|e| IngestError::NoParser(e.to_string()))?;

        debug!(job_id = %job.id, parser = %kind, "Parsing {}", request.url);

        let parse_request = ParseRequest::new(&request.url)
            .with_job(&job.id)
            .with_snapshot(request.html_snapshot.as_deref());
        let parsed = self.parsers.parse(kind, &parse_request).await?;

        if parsed.is_empty() {
            return Err(ExtractionError::Empty.into());
        }

        let receipt_id = self
            .writer
            .write(job, &request.user_id, &parsed)
            .await?;

        info!(
            job_id = %job.id,
            receipt_id = %receipt_id,
            items = parsed.items.len(),
            "Receipt stored"
        );
        Ok(receipt_id)
    }

    /// Move a job whose receipt is stored to `completed`.
    ///
    /// Database errors get one more try. A job this gives up on stays in
    /// `processing` and shows up as stuck in `jobs list`.
    async fn finish(&self, job_id: &str) -> bool {
        for attempt in 1..=COMPLETE_ATTEMPTS {
            match self.ledger.complete(job_id).await {
                Ok(_) => return true,
                Err(LedgerError::Database(e)) if attempt < COMPLETE_ATTEMPTS => {
                    warn!(job_id, attempt, "Failed to mark job completed, retrying: {}", e);
                    tokio::time::sleep(COMPLETE_RETRY_DELAY).await;
                }
                Err(e) => {
                    error!(job_id, "Receipt stored but job left in processing: {}", e);
                    return false;
                }
            }
        }
        false
    }

    async fn record_failure(&self, job: &ProcessingJob, err: IngestError) -> Ack {
        let kind = err.failure_kind().unwrap_or(FailureKind::Persistence);
        let message = err.to_string();

        if let Err(e) = self.ledger.fail(&job.id, kind, &message).await {
            warn!(job_id = %job.id, "Failed to record job failure: {}", e);
        }

        if err.is_retryable() && job.attempts < self.max_attempts {
            Ack::Retry {
                job_id: Some(job.id.clone()),
                message,
            }
        } else {
            Ack::Failed {
                job_id: job.id.clone(),
                kind,
                message,
            }
        }
    }
}

/// Map a ledger error that stopped a claim.
fn ledger_ack(job_id: Option<String>, err: LedgerError) -> Ack {
    match err {
        LedgerError::InvalidTransition { job_id, .. } => Ack::Duplicate { job_id },
        other => {
            warn!("Job ledger unavailable: {}", other);
            Ack::Retry {
                job_id,
                message: other.to_string(),
            }
        }
    }
}
