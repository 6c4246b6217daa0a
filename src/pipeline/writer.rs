//! Persistence writer: one receipt header, then its items.

use std::sync::Arc;

use tracing::{debug, error};

use super::error::PersistenceError;
use crate::models::{ParsedReceipt, ProcessingJob};
use crate::repository::ReceiptStore;

#[derive(Clone)]
pub struct PersistenceWriter {
    store: Arc<dyn ReceiptStore>,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn ReceiptStore>) -> Self {
        Self { store }
    }

    /// Store `parsed` for the job's scan and return the receipt id.
    ///
    /// A header failure writes nothing. An item failure after the header
    /// succeeded returns [`PersistenceError::PartialWrite`] with the id of
    /// the receipt that now exists without items; it is not rolled back.
    pub async fn write(
        &self,
        job: &ProcessingJob,
        user_id: &str,
        parsed: &ParsedReceipt,
    ) -> Result<String, PersistenceError> {
        let receipt_id = self
            .store
            .insert_header(&job.scanned_url_id, user_id, &parsed.header_info)
            .await
            .map_err(PersistenceError::Header)?;

        match self.store.insert_items(&receipt_id, &parsed.items).await {
            Ok(count) => {
                debug!(
                    job_id = %job.id,
                    receipt_id = %receipt_id,
                    items = count,
                    "receipt written"
                );
                Ok(receipt_id)
            }
            Err(source) => {
                error!(
                    job_id = %job.id,
                    receipt_id = %receipt_id,
                    "receipt header written but items failed: {}", source
                );
                Err(PersistenceError::PartialWrite { receipt_id, source })
            }
        }
    }
}
