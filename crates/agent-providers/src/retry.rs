//! Bounded retry with exponential backoff for provider calls.
//!
//! Only rate-limit and network failures are retried; everything else
//! propagates on the first attempt.

use std::future::Future;
use std::time::Duration;

use agent_core::Result;

/// Retry configuration for one provider client
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,

    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Run `op`, retrying retryable failures per the policy.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt);
                attempt += 1;
                tracing::warn!(
                    %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retryable provider error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
