//! Redelivery backoff for witness proofs
//!
//! A proof that failed on a transient store error is handed to the handler
//! again after a doubling, jittered delay. The handler never retries on its own; the
//! delivery layer decides with [`WitnessError::is_transient`].
//!
//! [`WitnessError::is_transient`]: crate::infra::WitnessError::is_transient

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

/// Backoff settings for redelivering one proof message
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Redeliveries after the first attempt
    pub max_retries: u32,
    /// Delay before the first redelivery; doubles after each one
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random (0.0-1.0)
    pub jitter: f64,
}

impl RetryConfig {
    /// Database-backed stores: 5 redeliveries from 50ms, capped at 5s
    pub fn delivery() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            jitter: 0.5,
        }
    }

    /// In-memory stores and tests
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            jitter: 0.3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before redelivery number `retry` (0-based)
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry.min(31)));
        let capped = doubled.min(self.max_delay).as_secs_f64();

        let spread = capped * self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((capped + offset).max(0.0))
    }
}

/// Final result of a delivery and how many handler calls it took
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub result: Result<T, E>,
    /// Handler calls made, including the first
    pub attempts: u32,
}

/// Redelivers an operation on retryable errors
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Call `operation` until it succeeds, fails with an error
    /// `should_retry` rejects, or `max_retries` redeliveries are spent.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        context: &str,
        operation: F,
        should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(
                            context,
                            attempts,
                            elapsed_ms = start.elapsed().as_millis(),
                            "Redelivery succeeded"
                        );
                    }
                    return RetryResult {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(error) => error,
            };

            if !should_retry(&error) {
                return RetryResult {
                    result: Err(error),
                    attempts,
                };
            }
            if attempts > self.config.max_retries {
                tracing::warn!(
                    context,
                    attempts,
                    error = %error,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Giving up after transient failures"
                );
                return RetryResult {
                    result: Err(error),
                    attempts,
                };
            }

            let delay = self.config.delay_for_attempt(attempts - 1);
            tracing::warn!(
                context,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                error = %error,
                "Transient failure, redelivering"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Whether a sqlx error may clear up on redelivery
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            // serialization failure, deadlock, connection exception, operator intervention
            matches!(&*code, "40001" | "40P01")
                || code.starts_with("08")
                || code.starts_with("57")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(100), Duration::from_secs(1));
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let config = RetryConfig {
            jitter: 0.5,
            ..no_jitter()
        };
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(99));
            assert!(delay <= Duration::from_millis(301));
        }
    }

    #[test]
    fn test_delivery_preset_honours_max_retries() {
        let config = RetryConfig::delivery().with_max_retries(1);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.initial_delay, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_redelivers_until_success() {
        let calls = AtomicU32::new(0);
        let retry = Retry::new(RetryConfig::fast().with_max_retries(5));

        let outcome = retry
            .run_with_predicate(
                "test",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("pool timed out")
                    } else {
                        Ok("stored")
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok("stored"));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let retry = Retry::new(RetryConfig::fast().with_max_retries(2));

        let outcome = retry
            .run_with_predicate("test", || async { Err::<(), _>("down") }, |_| true)
            .await;

        assert_eq!(outcome.attempts, 3);
        assert!(outcome.result.is_err());
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_redelivered() {
        let calls = AtomicU32::new(0);
        let retry = Retry::new(RetryConfig::fast().with_max_retries(5));

        let outcome = retry
            .run_with_predicate(
                "test",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("transient")
                    } else {
                        Err::<(), _>("malformed proof")
                    }
                },
                |e| *e == "transient",
            )
            .await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, Err("malformed proof"));
    }

    #[test]
    fn test_retryable_db_errors() {
        assert!(is_retryable_db_error(&sqlx::Error::PoolTimedOut));
        assert!(!is_retryable_db_error(&sqlx::Error::PoolClosed));
        assert!(!is_retryable_db_error(&sqlx::Error::RowNotFound));
    }
}
