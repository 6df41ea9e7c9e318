//! Retry driver with jittered exponential back-off.
//!
//! Wraps an async operation and re-invokes it while the returned error is
//! retryable ([`pl_domain::Error::is_retryable`]) and attempts remain. A
//! prior streaming attempt's partial progress is never reused; each attempt
//! restarts the request from scratch.

use std::future::Future;
use std::time::Duration;

use pl_domain::error::Result;

/// Controls how failed provider calls are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first try.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay (before jitter).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Compute the delay after the given attempt number (0-indexed):
    /// `min(base * 2^attempt, max) * (1 + u)` with `u` in `[0, 0.25)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * 2f64.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure; just enough to spread retry storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

/// Run `op`, retrying on retryable errors. Returns the final error when
/// attempts exhaust; non-retryable errors surface immediately.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && last_attempt + 1 < attempts => {
                let delay = policy.delay_for_attempt(last_attempt);
                tracing::warn!(
                    attempt = last_attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable provider error, backing off"
                );
                tokio::time::sleep(delay).await;
                last_attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
