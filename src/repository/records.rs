//! Diesel ORM records for database tables.

use diesel::prelude::*;

use crate::schema;

/// Scanned URL record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::scanned_urls)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScannedUrlRecord {
    pub id: String,
    pub url: String,
    pub user_id: String,
    pub html_snapshot: Option<String>,
    pub created_at: String,
}

/// New scanned URL for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::scanned_urls)]
pub struct NewScannedUrl<'a> {
    pub id: &'a str,
    pub url: &'a str,
    pub user_id: &'a str,
    pub html_snapshot: Option<&'a str>,
    pub created_at: &'a str,
}

/// Processing job record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::processing_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProcessingJobRecord {
    pub id: String,
    pub scanned_url_id: String,
    pub status: String,
    pub attempts: i32,
    pub last_attempted_at: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New processing job for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::processing_jobs)]
pub struct NewProcessingJob<'a> {
    pub id: &'a str,
    pub scanned_url_id: &'a str,
    pub status: &'a str,
    pub attempts: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Receipt record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::receipts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReceiptRecord {
    pub id: String,
    pub scanned_url_id: String,
    pub user_id: String,
    pub receipt_date: Option<String>,
    pub total_amount: Option<f64>,
    pub store_name: Option<String>,
    pub uid: Option<String>,
    pub created_at: String,
}

/// New receipt for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::receipts)]
pub struct NewReceipt<'a> {
    pub id: &'a str,
    pub scanned_url_id: &'a str,
    pub user_id: &'a str,
    pub receipt_date: Option<&'a str>,
    pub total_amount: Option<f64>,
    pub store_name: Option<&'a str>,
    pub uid: Option<&'a str>,
    pub created_at: &'a str,
}

/// Receipt item record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::receipt_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReceiptItemRecord {
    pub id: i32,
    pub receipt_id: String,
    pub name: String,
    pub quantity: f64,
    pub price: f64,
    pub unit_price: Option<f64>,
    pub vat_percentage: Option<f64>,
}

/// New receipt item for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::receipt_items)]
pub struct NewReceiptItem<'a> {
    pub receipt_id: &'a str,
    pub name: &'a str,
    pub quantity: f64,
    pub price: f64,
    pub unit_price: Option<f64>,
    pub vat_percentage: Option<f64>,
}

/// Pending scan record from the device database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::pending_scans)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingScanRecord {
    pub id: i32,
    pub url: String,
    pub html_snapshot: Option<String>,
    pub user_id: Option<String>,
    pub captured_at: String,
}

/// New pending scan for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::pending_scans)]
pub struct NewPendingScan<'a> {
    pub url: &'a str,
    pub html_snapshot: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub captured_at: &'a str,
}
