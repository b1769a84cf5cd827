//! Retry policy with exponential backoff.
//!
//! Stateless: all logic lives in associated functions that take the
//! configuration as a parameter. Only retryable failures are retried;
//! fatal failures end the step on the attempt they occur.

use std::time::Duration;

use triform_types::tool::ErrorClass;
use triform_types::workflow::RetryConfig;

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Determine whether another attempt should be made.
    ///
    /// `attempt` is 1-based (first execution is attempt 1).
    pub fn should_retry(config: &RetryConfig, attempt: u32, class: ErrorClass) -> bool {
        class == ErrorClass::Retryable && attempt < config.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt - 1)`, capped at `max_backoff_ms`.
    pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = config.initial_backoff_ms as f64 * config.multiplier.max(1.0).powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(config.max_backoff_ms as f64)
        } else {
            config.max_backoff_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}
