//! Bounded exponential backoff for transient block stage failures.

use crate::metrics;
use cask_core::config::RetryConfig;
use cask_storage::StorageError;
use std::future::Future;
use std::time::Duration;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a cap on attempts and on the delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Decide what to do after `attempt` (1-based) failed with `error`.
    ///
    /// Only transient storage errors are retried.
    pub fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision {
        if attempt >= self.max_attempts || !error.is_transient() {
            return RetryDecision::NoRetry;
        }

        // base * 2^(attempt-1), capped
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}

/// A storage error that outlived the retry policy.
#[derive(Debug)]
pub struct Exhausted {
    /// The last error seen.
    pub error: StorageError,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Run `op` until it succeeds or the policy says to stop.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => match policy.decide(attempt, &error) {
                RetryDecision::NoRetry => {
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    metrics::BLOCK_STAGE_RETRIES.inc();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}
