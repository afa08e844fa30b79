//! Retry with exponential backoff and jitter
//!
//! Delay for attempt `n` (zero-based) is `base_delay * 2^n`, capped at
//! `max_delay`, then spread by `±jitter_factor / 2`. Callers decide which
//! errors are worth retrying; everything else fails fast.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_JITTER_FACTOR: f64 = 0.1;
const MAX_MAX_ATTEMPTS: u32 = 20;
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Errors from a retried operation
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("all {attempts} attempts failed, last error: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed with an error the caller marked as final.
    #[error("non-retryable failure on attempt {attempts}: {error}")]
    NonRetryable { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// The last error the operation produced.
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NonRetryable { error, .. } => error,
        }
    }

    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::NonRetryable { attempts, .. } => *attempts,
        }
    }
}

/// Invalid strategy parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid retry configuration: {0}")]
pub struct RetryConfigError(String);

/// Retry strategy with configurable exponential backoff and jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryStrategy {
    /// Create a custom retry strategy with validation
    pub fn custom(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, RetryConfigError> {
        if !(1..=MAX_MAX_ATTEMPTS).contains(&max_attempts) {
            return Err(RetryConfigError(format!(
                "max_attempts must be between 1 and {MAX_MAX_ATTEMPTS}, got {max_attempts}"
            )));
        }
        if base_delay > max_delay {
            return Err(RetryConfigError(format!(
                "base_delay ({base_delay:?}) cannot be greater than max_delay ({max_delay:?})"
            )));
        }
        Ok(Self { max_attempts, base_delay, max_delay, jitter_factor: DEFAULT_JITTER_FACTOR })
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    #[must_use]
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn get_delay(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.exponential_delay(attempt))
    }

    fn exponential_delay(&self, attempt: u32) -> Duration {
        let base_millis = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_millis = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let multiplier = 2_u64.saturating_pow(attempt.min(MAX_BACKOFF_EXPONENT));
        Duration::from_millis(base_millis.saturating_mul(multiplier).min(max_millis))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let delay_millis = delay.as_millis() as f64;
        let jitter_range = delay_millis * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::from_millis((delay_millis + jitter).max(0.0) as u64)
    }

    /// Run `operation` until it succeeds, fails with an error `should_retry`
    /// rejects, or the attempt budget is spent.
    ///
    /// The closure receives the one-based attempt number.
    #[cfg(feature = "runtime")]
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        operation_name: &str,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !should_retry(&err) => {
                    return Err(RetryError::NonRetryable { attempts: attempt, error: err });
                }
                Err(err) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "All retry attempts failed"
                    );
                    return Err(RetryError::Exhausted { attempts: attempt, last: err });
                }
                Err(err) => {
                    let delay = self.get_delay(attempt - 1);
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(attempts: u32) -> RetryStrategy {
        RetryStrategy::custom(attempts, Duration::from_millis(1), Duration::from_millis(4))
            .unwrap()
            .with_jitter_factor(0.0)
    }

    #[test]
    fn delays_double_and_cap() {
        let strategy =
            RetryStrategy::custom(5, Duration::from_millis(100), Duration::from_millis(350))
                .unwrap()
                .with_jitter_factor(0.0);
        assert_eq!(strategy.get_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.get_delay(1), Duration::from_millis(200));
        assert_eq!(strategy.get_delay(2), Duration::from_millis(350));
        assert_eq!(strategy.get_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_band() {
        let strategy =
            RetryStrategy::custom(3, Duration::from_millis(1000), Duration::from_secs(10))
                .unwrap()
                .with_jitter_factor(0.2);
        for _ in 0..50 {
            let millis = strategy.get_delay(0).as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis} outside jitter band");
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(RetryStrategy::custom(0, Duration::ZERO, Duration::ZERO).is_err());
        assert!(RetryStrategy::custom(3, Duration::from_secs(2), Duration::from_secs(1)).is_err());
    }

    #[cfg(feature = "runtime")]
    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> = fast(4)
            .execute(
                "flaky",
                |_err: &String| true,
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err("unavailable".to_string())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[cfg(feature = "runtime")]
    #[tokio::test]
    async fn stops_at_attempt_budget() {
        let result: Result<(), RetryError<String>> = fast(2)
            .execute("down", |_: &String| true, |_| async { Err("503".to_string()) })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 2, .. }));
        assert_eq!(err.into_source(), "503");
    }

    #[cfg(feature = "runtime")]
    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = fast(5)
            .execute(
                "auth",
                |err: &String| err != "401",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("401".to_string()) }
                },
            )
            .await;
        assert!(matches!(result, Err(RetryError::NonRetryable { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
