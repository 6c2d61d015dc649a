//! Caller-side retry with capped attempts and linear backoff
//!
//! The control core never retries on its own. Callers that want retries
//! wrap a whole operation, so every attempt goes back through the policy
//! check and the executor from scratch.

use kiosk_common::config::RetryConfig;
use kiosk_common::{ControlError, ControlResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; the n-th failure waits `n * base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempts run out.
///
/// Exhausting more than one attempt yields `MaxRetriesReached` wrapping the
/// last error; a single-attempt policy returns the error unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> ControlResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt >= max_attempts {
            if max_attempts == 1 {
                return Err(err);
            }
            return Err(ControlError::MaxRetriesReached {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = policy.delay_after(attempt);
        warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
