//! Retry with exponential backoff and jitter.
//!
//! Only operations a provider declares retry-safe go through here, and
//! only transient errors are retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rigging_common::config::RetrySettings;
use rigging_common::error::Result;
use tracing::{error, warn};

/// Backoff policy for one operation.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
    /// Growth factor between delays.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.multiplier,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error,
/// or `policy.max_attempts` is reached. Returns the last error.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_transient() {
                    return Err(e);
                }
                if attempt >= policy.max_attempts {
                    if policy.max_attempts > 1 {
                        error!(
                            operation = %operation_name,
                            attempt,
                            error = %e,
                            "operation failed after max retries"
                        );
                    }
                    return Err(e);
                }

                // 0.5x to 1.5x of the nominal delay
                let jitter = rand::rng().random_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis(),
                    "operation failed, retrying"
                );

                tokio::time::sleep(jittered).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
