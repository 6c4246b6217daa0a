//! Device side: capture, local queue draining and the periodic sync.

mod capture;
mod client;
mod reconciler;
mod scheduler;

pub use capture::{deliver_pending, Delivery, ScanCapture};
pub use client::{IngestClient, ScanSubmitter, SubmitError};
pub use reconciler::{SyncReconciler, SyncReport};
pub use scheduler::{next_delay, SyncScheduler, Tick};
