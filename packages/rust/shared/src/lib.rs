//! Shared types, error model, configuration and retry policy for jobsync.
//!
//! This crate is the foundation depended on by all other jobsync crates.
//! It provides:
//! - [`SyncError`], the unified error type
//! - Domain types ([`Job`], [`DateWindow`], [`SourceFilter`], [`RunId`])
//! - Configuration ([`AppConfig`], config loading, secret lookup)
//! - [`with_retry`] for backoff on rate-limited calls

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, RetrySettings, SheetsConfig, SyncSettings, WORKIZ_MAX_PAGE_SIZE, WorkizConfig,
    config_dir, config_file_path, init_config_at, load_config, load_config_from,
    service_account_json, workiz_token,
};
pub use error::{Result, SyncError};
pub use retry::{RetryPolicy, with_retry};
pub use types::{DateWindow, JOB_KEY_FIELD, Job, Row, RunId, SourceFilter};
