//! Error types for jobsync.
//!
//! Library crates use [`SyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all jobsync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The remote API refused the call because of rate limiting (HTTP 429).
    #[error("{service} rate limited: {message}")]
    RateLimited { service: String, message: String },

    /// The remote API answered with a non-success status.
    #[error("{service} API error (HTTP {status}): {message}")]
    Api {
        service: String,
        status: u16,
        message: String,
    },

    /// Credential decoding, signing or token exchange failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// Response decoding error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (header mismatch, bad date window, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map a non-success HTTP status from `service` to the matching variant.
    pub fn from_status(service: &str, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                service: service.to_string(),
                message,
            },
            401 | 403 => Self::Auth(format!("{service} rejected credentials (HTTP {status}): {message}")),
            _ => Self::Api {
                service: service.to_string(),
                status,
                message,
            },
        }
    }

    /// Whether the retry layer should back off and try again.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
