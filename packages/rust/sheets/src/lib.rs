//! Google Sheets access for jobsync.
//!
//! This crate provides:
//! - [`auth`]: service-account token exchange and caching
//! - [`a1`]: A1-notation range helpers
//! - [`SheetsClient`]: read, batch-update and append calls with rate-limit backoff

pub mod a1;
pub mod auth;
pub mod client;

pub use auth::{Auth, SPREADSHEETS_SCOPE, ServiceAccountAuth, ServiceAccountKey};
pub use client::{AppendOutcome, SheetsClient, ValueRange};
