//! Retry executor with exponential backoff.

use llm_core::Error;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration (spec §4.1): `100ms · 2^attempt` backoff, clamped to a `u64` shift range
/// to avoid overflow on pathological `max_retries` values.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Number of retries after the first attempt. Total attempts made is `1 + max_retries`.
    pub max_retries: u32,
    /// Base delay multiplied by `2^attempt`.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Build a retry config with `max_retries` retries (total attempts `1 + max_retries`) and
    /// the default `100ms` base delay.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before the `attempt`-th retry (0-indexed: the delay before the first retry is
    /// `attempt = 0`), i.e. `base_delay * 2^attempt`. The shift is clamped to `[0, 63]` so huge
    /// attempt counts saturate rather than panic or overflow.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(63);
        self.base_delay.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX))
    }
}

/// Execute `f` under the given retry policy, retrying only on errors for which
/// [`llm_core::Error::is_retryable`] returns `true`.
///
/// # Errors
/// Returns the last error encountered once attempts are exhausted, or immediately on the first
/// non-retryable error.
pub async fn retry<F, Fut, T>(config: RetryConfig, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && err.is_retryable() => {
                let delay = config.delay_for_attempt(attempt);
                warn!(attempt, ?delay, error = %err, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(attempt, error = %err, "retry budget exhausted or non-retryable");
                return Err(err);
            }
        }
    }
}
