//! Ingestion pipeline: scan event in, receipt out.

mod delivery;
mod dispatcher;
mod error;
mod writer;

pub use delivery::{deliver_with_retry, spawn_delivery_worker, DeliveryQueue, DELIVERY_BUFFER};
pub use dispatcher::{Ack, Dispatcher, DEFAULT_MAX_ATTEMPTS};
pub use error::{IngestError, PersistenceError};
pub use writer::PersistenceWriter;
