//! Request retry with exponential backoff.
//!
//! Every GitLab call goes through [`retry_with_backoff`]: an attempt is
//! repeated while the classifier says the outcome is transient, waiting
//! `backoff_base_ms * 2^(attempt - 1)` between attempts.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Statuses retried by default. 422 is included because GitLab answers some
/// concurrent writes with it before succeeding on a later attempt.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 11] =
    [408, 413, 422, 429, 500, 502, 503, 504, 521, 522, 524];

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Retry configuration for the GitLab transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = run once).
    pub limit: u32,
    /// Response statuses considered transient.
    pub status_codes: Vec<u16>,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
    /// Maximum wall-clock time for a single request (milliseconds).
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RETRY_LIMIT,
            status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            backoff_base_ms: 1_000,
            timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }

    /// Delay before the retry following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Run `op` until it yields an outcome `is_transient` rejects, or the retry
/// budget is spent. The last outcome is returned as-is.
pub async fn retry_with_backoff<T, F, Fut, C>(policy: &RetryPolicy, op: F, is_transient: C) -> T
where
    F: Fn() -> Fut,
    Fut: Future<Output = T>,
    C: Fn(&T) -> bool,
{
    let max_attempts = policy.limit.saturating_add(1);
    let mut attempt = 1;

    loop {
        let outcome = op().await;
        if attempt >= max_attempts || !is_transient(&outcome) {
            return outcome;
        }

        let delay = policy.backoff(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying GitLab request");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
