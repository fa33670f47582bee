//! Bounded retry with exponential backoff for provider calls.
//!
//! Only failures that `FetchError::is_retryable` accepts are retried;
//! everything else is returned on the first attempt.

use crate::model::FetchError;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum jitter as a fraction of the delay (0.25 = ±25%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 500,
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no sleeping. Used by tests and replay runs.
    pub fn none() -> Self {
        RetryConfig {
            max_attempts: 1,
            base_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }
}

/// Runs `func` until it succeeds, fails permanently, or attempts run out.
///
/// `on_retry` is called with the attempt number and error before each sleep.
pub fn with_retry<T, F, R>(config: &RetryConfig, mut func: F, mut on_retry: R) -> Result<T, FetchError>
where
    F: FnMut() -> Result<T, FetchError>,
    R: FnMut(u32, &FetchError),
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match func() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                on_retry(attempt + 1, &err);
                std::thread::sleep(backoff_with_jitter(attempt, config));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Calculate backoff delay with jitter for a given attempt.
///
/// Uses exponential backoff: base_delay * 2^attempt, plus random jitter of
/// ±jitter_factor.
fn backoff_with_jitter(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_range = (base_delay as f64 * config.jitter_factor) as u64;
    if jitter_range == 0 {
        return Duration::from_millis(base_delay);
    }
    let jitter = rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
    let delay_ms = (base_delay as i64 + jitter).max(0) as u64;
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_retries_transient_failure_then_succeeds() {
        let calls = Cell::new(0);
        let result = with_retry(
            &RetryConfig { max_attempts: 3, base_delay_ms: 0, jitter_factor: 0.0 },
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(FetchError::HttpError(503))
                } else {
                    Ok("body")
                }
            },
            |_, _| {},
        );
        assert_eq!(result, Ok("body"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_does_not_retry_permanent_failure() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(
            &RetryConfig { max_attempts: 5, base_delay_ms: 0, jitter_factor: 0.0 },
            || {
                calls.set(calls.get() + 1);
                Err(FetchError::HttpError(400))
            },
            |_, _| {},
        );
        assert_eq!(result, Err(FetchError::HttpError(400)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let retries = Cell::new(0);
        let result: Result<(), _> = with_retry(
            &RetryConfig { max_attempts: 2, base_delay_ms: 0, jitter_factor: 0.0 },
            || {
                calls.set(calls.get() + 1);
                Err(FetchError::RequestFailed("connection reset".into()))
            },
            |_, _| retries.set(retries.get() + 1),
        );
        assert!(matches!(result, Err(FetchError::RequestFailed(_))));
        assert_eq!(calls.get(), 2);
        assert_eq!(retries.get(), 1);
    }

    #[test]
    fn test_backoff_grows_exponentially_without_jitter() {
        let config = RetryConfig { max_attempts: 4, base_delay_ms: 100, jitter_factor: 0.0 };
        assert_eq!(backoff_with_jitter(0, &config), Duration::from_millis(100));
        assert_eq!(backoff_with_jitter(2, &config), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let config = RetryConfig { max_attempts: 4, base_delay_ms: 1000, jitter_factor: 0.25 };
        for _ in 0..20 {
            let delay = backoff_with_jitter(0, &config).as_millis();
            assert!((750..=1250).contains(&delay), "delay {} out of range", delay);
        }
    }
}
