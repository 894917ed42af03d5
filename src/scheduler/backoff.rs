//! Classification-aware retry for single external calls.
//!
//! Retryable failures (429, 5xx, network, timeout) are retried with exponential
//! backoff plus jitter. Anything else is returned immediately. Operations
//! passed in here must be safe to run more than once.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Errors that know whether they are worth retrying.
pub trait Retryable {
    /// True for 429, 5xx, network and timeout failures.
    fn is_retryable(&self) -> bool;

    /// Server-suggested delay, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound on the exponential part (milliseconds).
    pub max_delay_ms: u64,
    /// Upper bound on the random jitter added to every delay (milliseconds).
    pub jitter_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ms: 500,
            max_retries: 3,
        }
    }
}

impl BackoffConfig {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64, max_retries: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_ms,
            max_retries,
        }
    }

    /// Exponential part of the delay before retry number `attempt` (0-based), capped.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Runs an operation with retry on transient failures.
#[derive(Debug, Clone, Default)]
pub struct BackoffExecutor {
    config: BackoffConfig,
}

impl BackoffExecutor {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Run `operation` with the configured retry budget.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.execute_with_retries(self.config.max_retries, operation).await
    }

    /// Run `operation`, retrying retryable failures up to `max_retries` times.
    ///
    /// Returns the last error once retries are exhausted, or the first fatal one.
    pub async fn execute_with_retries<T, E, F, Fut>(&self, max_retries: u32, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    tracing::debug!(error = %err, "Fatal provider error, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= max_retries => {
                    tracing::warn!(attempts = attempt + 1, error = %err, "Retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt, err.retry_after());
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient provider error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delay before retry `attempt`: the larger of the server hint and the
    /// capped exponential delay, plus jitter.
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self.config.exponential_delay(attempt);
        let base = retry_after.map_or(exponential, |hint| hint.max(exponential));
        base + self.jitter()
    }

    fn jitter(&self) -> Duration {
        if self.config.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=self.config.jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug)]
    struct TestError {
        status: u16,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "status {}", self.status)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.status == 429 || self.status >= 500
        }
    }

    fn executor() -> BackoffExecutor {
        BackoffExecutor::new(BackoffConfig::new(100, 1_000, 0, 3))
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let config = BackoffConfig::new(100, 1_000, 0, 3);
        assert_eq!(config.exponential_delay(0), Duration::from_millis(100));
        assert_eq!(config.exponential_delay(1), Duration::from_millis(200));
        assert_eq!(config.exponential_delay(3), Duration::from_millis(800));
        assert_eq!(config.exponential_delay(4), Duration::from_millis(1_000));
        assert_eq!(config.exponential_delay(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let executor = BackoffExecutor::new(BackoffConfig::new(100, 1_000, 50, 3));
        for _ in 0..100 {
            let delay = executor.delay_for(0, None);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_retry_after_hint_wins_when_larger() {
        let executor = executor();
        assert_eq!(
            executor.delay_for(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            executor.delay_for(2, Some(Duration::from_millis(10))),
            Duration::from_millis(400)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<&str, TestError> = executor()
            .execute(move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(TestError { status: 503 }) } else { Ok("done") }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> = executor()
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { status: 404 })
            })
            .await;

        assert_eq!(result.unwrap_err().status, 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> = executor()
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { status: 429 })
            })
            .await;

        assert_eq!(result.unwrap_err().status, 429);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let start = Instant::now();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let _: Result<(), TestError> = executor()
            .execute_with_retries(2, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { status: 500 })
            })
            .await;

        // 100ms + 200ms
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> = executor()
            .execute_with_retries(0, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { status: 502 })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
