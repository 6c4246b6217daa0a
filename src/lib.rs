//! receiptscan - receipt QR-scan ingestion.
//!
//! Turns the URL encoded in a receipt's QR code into a stored receipt with
//! line items. The server side resolves a site parser, records every
//! attempt in a job ledger and writes the result exactly once per scan.
//! The device side keeps captured scans in a local queue until the server
//! confirms them.

pub mod cli;
pub mod config;
pub mod device;
pub mod fetch;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod server;
