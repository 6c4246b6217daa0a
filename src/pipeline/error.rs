//! Pipeline error taxonomy.

use thiserror::Error;

use crate::models::FailureKind;
use crate::parsers::ExtractionError;
use crate::repository::DbError;

/// Failure while storing a parsed receipt.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Nothing was written.
    #[error("Failed to write receipt header: {0}")]
    Header(#[source] DbError),

    /// The header exists but its items could not be written. The receipt is
    /// left in place for manual reconciliation.
    #[error("Receipt {receipt_id} was written without items: {source}")]
    PartialWrite {
        receipt_id: String,
        #[source]
        source: DbError,
    },
}

impl PersistenceError {
    /// Id of the orphaned receipt, if any.
    pub fn orphan_receipt_id(&self) -> Option<&str> {
        match self {
            PersistenceError::PartialWrite { receipt_id, .. } => Some(receipt_id),
            PersistenceError::Header(_) => None,
        }
    }
}

/// Everything that can go wrong handling one scan event.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed event. No job is created.
    #[error("Invalid scan event: {0}")]
    Validation(String),

    /// A job already exists for this scan.
    #[error("Scan {0} is already being handled")]
    DuplicateJob(String),

    #[error("No parser for {0}")]
    NoParser(String),

    #[error("Extraction failed: {0}")]
    Extraction(ExtractionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Missing or invalid ingest secret")]
    Authorization,

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<ExtractionError> for IngestError {
    fn from(e: ExtractionError) -> Self {
        if e.is_timeout() {
            IngestError::NetworkTimeout(e.to_string())
        } else {
            IngestError::Extraction(e)
        }
    }
}

impl IngestError {
    /// Only infrastructure failures should be redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::NetworkTimeout(_) | IngestError::Database(_))
    }

    /// How the failure is recorded on the job, for errors that reach the ledger.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            IngestError::NoParser(_) => Some(FailureKind::NoParser),
            IngestError::Extraction(ExtractionError::MissingRenderedContent) => {
                Some(FailureKind::MissingRenderedContent)
            }
            IngestError::Extraction(_) => Some(FailureKind::Extraction),
            IngestError::Persistence(PersistenceError::PartialWrite { .. }) => {
                Some(FailureKind::PartialWrite)
            }
            IngestError::Persistence(_) | IngestError::Database(_) => {
                Some(FailureKind::Persistence)
            }
            IngestError::NetworkTimeout(_) => Some(FailureKind::Timeout),
            IngestError::Validation(_)
            | IngestError::DuplicateJob(_)
            | IngestError::Authorization => None,
        }
    }
}
