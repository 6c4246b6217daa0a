//! Domain models for the ingestion pipeline and the device-side scan queue.

mod job;
mod pending;
mod receipt;
mod scan;

pub use job::{FailureKind, JobStatus, ProcessingJob, STUCK_AFTER_MINUTES};
pub use pending::{CapturedScan, PendingScan};
pub use receipt::{ParsedItem, ParsedReceipt, Receipt, ReceiptHeader, ReceiptItem};
pub use scan::{
    NewScan, ScanEvent, ScanEventRecord, ScanRequest, ScannedUrl, SubmitAck, INSERT_EVENT,
};
