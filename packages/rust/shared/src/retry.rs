//! Bounded exponential backoff for rate-limited API calls.
//!
//! Both the Workiz and Google Sheets clients route every request through
//! [`with_retry`]. Only [`SyncError::RateLimited`] is retried; any other error
//! is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::config::RetrySettings;
use crate::error::{Result, SyncError};

/// Backoff parameters for one client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Extra attempts after the first one.
    pub max_retries: usize,
    /// Whether to randomize delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            min_delay: settings.min_delay(),
            max_delay: settings.max_delay(),
            max_retries: settings.max_retries,
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// A policy with no delay between attempts, for tests against mock servers.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_retries,
            jitter: false,
        }
    }

    /// Build the exponential backoff strategy for this policy.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Run `operation`, backing off and retrying while it reports rate limiting.
///
/// `label` identifies the call in logs (never include secrets in it).
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    operation
        .retry(policy.backoff())
        .when(SyncError::is_rate_limited)
        .notify(|err: &SyncError, delay: Duration| {
            attempt += 1;
            tracing::warn!(
                call = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "rate limited, backing off"
            );
        })
        .await
}
