//! Receipt and receipt item repository.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::pool::{DbError, DbPool};
use super::records::{NewReceipt, NewReceiptItem, ReceiptItemRecord, ReceiptRecord};
use super::{format_datetime, parse_datetime, parse_datetime_opt};
use crate::models::{ParsedItem, Receipt, ReceiptHeader, ReceiptItem};
use crate::schema::{receipt_items, receipts};

/// Storage used by the persistence writer.
///
/// Header and items are separate calls: a failure between them leaves a
/// header without items, which the writer reports explicitly.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Insert a receipt header and return its id.
    async fn insert_header(
        &self,
        scanned_url_id: &str,
        user_id: &str,
        header: &ReceiptHeader,
    ) -> Result<String, DbError>;

    /// Insert all items for a receipt; either every item lands or none do.
    async fn insert_items(&self, receipt_id: &str, items: &[ParsedItem]) -> Result<usize, DbError>;
}

impl From<ReceiptRecord> for Receipt {
    fn from(record: ReceiptRecord) -> Self {
        Receipt {
            id: record.id,
            scanned_url_id: record.scanned_url_id,
            user_id: record.user_id,
            receipt_date: parse_datetime_opt(record.receipt_date),
            total_amount: record.total_amount,
            store_name: record.store_name,
            uid: record.uid,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

impl From<ReceiptItemRecord> for ReceiptItem {
    fn from(record: ReceiptItemRecord) -> Self {
        ReceiptItem {
            id: record.id,
            receipt_id: record.receipt_id,
            name: record.name,
            quantity: record.quantity,
            price: record.price,
            unit_price: record.unit_price,
            vat_percentage: record.vat_percentage,
        }
    }
}

#[derive(Clone)]
pub struct ReceiptRepository {
    pool: DbPool,
}

impl ReceiptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Receipt>, DbError> {
        let mut conn = self.pool.get().await?;

        receipts::table
            .find(id)
            .first::<ReceiptRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Receipt::from))
    }

    pub async fn get_by_scanned_url(
        &self,
        scanned_url_id: &str,
    ) -> Result<Option<Receipt>, DbError> {
        let mut conn = self.pool.get().await?;

        receipts::table
            .filter(receipts::scanned_url_id.eq(scanned_url_id))
            .first::<ReceiptRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Receipt::from))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Receipt>, DbError> {
        let mut conn = self.pool.get().await?;

        receipts::table
            .filter(receipts::user_id.eq(user_id))
            .order(receipts::created_at.desc())
            .load::<ReceiptRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Receipt::from).collect())
    }

    pub async fn items(&self, receipt_id: &str) -> Result<Vec<ReceiptItem>, DbError> {
        let mut conn = self.pool.get().await?;

        receipt_items::table
            .filter(receipt_items::receipt_id.eq(receipt_id))
            .order(receipt_items::id.asc())
            .load::<ReceiptItemRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(ReceiptItem::from).collect())
    }

    /// Delete a receipt owned by `user_id`. Items go with it.
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::delete(
            receipts::table
                .filter(receipts::id.eq(id))
                .filter(receipts::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await?;

        Ok(rows > 0)
    }
}

#[async_trait]
impl ReceiptStore for ReceiptRepository {
    async fn insert_header(
        &self,
        scanned_url_id: &str,
        user_id: &str,
        header: &ReceiptHeader,
    ) -> Result<String, DbError> {
        let mut conn = self.pool.get().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = format_datetime(&Utc::now());
        let receipt_date = header.receipt_date.as_ref().map(format_datetime);

        diesel::insert_into(receipts::table)
            .values(NewReceipt {
                id: &id,
                scanned_url_id,
                user_id,
                receipt_date: receipt_date.as_deref(),
                total_amount: header.total_amount,
                store_name: header.store_name.as_deref(),
                uid: header.uid.as_deref(),
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(id)
    }

    async fn insert_items(&self, receipt_id: &str, items: &[ParsedItem]) -> Result<usize, DbError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get().await?;

        let rows: Vec<NewReceiptItem<'_>> = items
            .iter()
            .map(|item| NewReceiptItem {
                receipt_id,
                name: &item.name,
                quantity: item.quantity,
                price: item.price,
                unit_price: item.unit_price,
                vat_percentage: item.vat_percentage,
            })
            .collect();

        // SQLite has no multi-row insert with defaults, so rows go one at a
        // time inside a single transaction.
        conn.transaction(|conn| {
            Box::pin(async move {
                for row in &rows {
                    diesel::insert_into(receipt_items::table)
                        .values(row)
                        .execute(conn)
                        .await?;
                }
                Ok::<_, DbError>(rows.len())
            })
        })
        .await
    }
}
