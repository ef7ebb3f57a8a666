//! Per-stage recovery configuration and the caller-side retry executor.
//!
//! The engine itself never retries a failed stage; retry policy belongs to
//! the caller, expressed as a [`RecoveryStrategy`] plus re-invocation of the
//! strategy's `execute`. [`retry_with_policy`] is the executor for that
//! pattern: exponential backoff with full jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Read-only per-stage recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    /// Maximum retry attempts after the initial try.
    pub max_retries: u32,
    /// Base delay between retries in seconds.
    pub retry_delay_seconds: f64,
    /// Multiplier applied to the delay per attempt.
    pub backoff_multiplier: f64,
    /// Circuit open duration in seconds.
    pub timeout_seconds: f64,
    /// Failure count at which the caller should open the circuit.
    pub circuit_breaker_threshold: u32,
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 5.0,
            backoff_multiplier: 2.0,
            timeout_seconds: 300.0,
            circuit_breaker_threshold: 5,
        }
    }
}

impl RecoveryStrategy {
    /// Computes the backoff delay for a 0-indexed attempt, without jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(0.0).powi(attempt.min(16) as i32);
        Duration::from_secs_f64((self.retry_delay_seconds.max(0.0) * factor).min(3600.0))
    }
}

/// Applies full jitter to a delay: a uniform draw from `[0, delay]`.
fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

/// Re-invokes a fallible async operation according to a recovery policy.
///
/// Runs the operation up to `1 + max_retries` times, sleeping a jittered
/// exponential backoff between attempts. Returns the first success or the
/// last error.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RecoveryStrategy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }

                let delay = jittered(policy.delay_for_attempt(attempt));
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
