//! Bounded retry loop with exponential backoff and jitter.
//!
//! One loop serves both execution models. The only difference between
//! [`RetryExecutor::execute`] and [`RetryExecutor::execute_blocking`] is the
//! [`Sleeper`] used between attempts:
//! - [`TokioSleeper`] suspends the calling task, other tasks keep running
//! - [`ThreadSleeper`] parks the calling thread, for synchronous callers
//!
//! Either way only the caller waits, so concurrent retry loops run on
//! independent timers.

use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{Categorized, ErrorCategory, ResilienceError};
use crate::metrics::RetryMetrics;

/// Jitter spread as a fraction of the computed delay.
const JITTER_FRACTION: f64 = 0.1;

/// Retry policy. Pure configuration, consumed per call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Perturb delays by up to ±10%.
    pub jitter: bool,
    /// Categories that trigger another attempt. Anything else is fatal.
    pub retry_on: HashSet<ErrorCategory>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
            retry_on: ErrorCategory::default_retryable().collect(),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Replace the set of retryable categories.
    pub fn with_retry_on(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retry_on = categories.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        self.retry_on.contains(&category)
    }

    /// Delay after the failed attempt with index `attempt` (0-based), before jitter:
    /// `min(min_delay * backoff_factor^attempt, max_delay)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.min_delay.as_secs_f64() * self.backoff_factor.powi(exponent);

        if raw.is_finite() {
            Duration::from_secs_f64(raw.clamp(0.0, max_secs))
        } else {
            self.max_delay
        }
    }

    /// [`RetryConfig::base_delay`] with jitter applied when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }

        let offset = (rand::random::<f64>() * 2.0 - 1.0) * JITTER_FRACTION;
        Duration::from_secs_f64((base.as_secs_f64() * (1.0 + offset)).max(0.0))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(ConfigError::invalid(
                "backoff_factor",
                format!("must be greater than 1.0, got {}", self.backoff_factor),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::invalid(
                "min_delay",
                format!(
                    "{:?} exceeds max_delay {:?}",
                    self.min_delay, self.max_delay
                ),
            ));
        }
        Ok(())
    }
}

/// Environment variables:
/// - `RETRY_MAX_ATTEMPTS` (default: 3)
/// - `RETRY_MIN_DELAY_MS` (default: 1000)
/// - `RETRY_MAX_DELAY_MS` (default: 60000)
/// - `RETRY_BACKOFF_FACTOR` (default: 2.0)
/// - `RETRY_JITTER` (default: true)
/// - `RETRY_ON` (comma separated categories, default: everything but `permanent`)
impl FromEnv for RetryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let min_delay_ms: u64 = env_parse("RETRY_MIN_DELAY_MS", "1000")?;
        let max_delay_ms: u64 = env_parse("RETRY_MAX_DELAY_MS", "60000")?;

        let retry_on_raw = env_or_default("RETRY_ON", "");
        let retry_on = if retry_on_raw.trim().is_empty() {
            ErrorCategory::default_retryable().collect()
        } else {
            ErrorCategory::parse_list(&retry_on_raw).map_err(|e| ConfigError::ParseError {
                key: "RETRY_ON".to_string(),
                details: e.to_string(),
            })?
        };

        let config = Self {
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", "3")?,
            min_delay: Duration::from_millis(min_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_factor: env_parse("RETRY_BACKOFF_FACTOR", "2.0")?,
            jitter: env_parse("RETRY_JITTER", "true")?,
            retry_on,
        };
        config.validate()?;
        Ok(config)
    }
}

/// How the retry loop waits between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Suspends the current task on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Blocks the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move { std::thread::sleep(duration) })
    }
}

/// Runs units of work under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry an async operation, sleeping on the tokio timer between attempts.
    ///
    /// `operation` names the unit of work in logs, metrics and the
    /// [`ResilienceError::RetryExhausted`] error.
    ///
    /// # Example
    /// ```ignore
    /// let executor = RetryExecutor::new(RetryConfig::new().with_max_attempts(5));
    /// let doc = executor.execute("fetch_document", || client.fetch(id)).await?;
    /// ```
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: &str,
        f: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Categorized + Display,
    {
        self.execute_with(&TokioSleeper, operation, f).await
    }

    /// Retry a synchronous operation, blocking the calling thread between attempts.
    ///
    /// Do not call this from inside an async runtime worker; use
    /// [`RetryExecutor::execute`] there.
    pub fn execute_blocking<F, T, E>(&self, operation: &str, mut f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Categorized + Display,
    {
        futures::executor::block_on(self.execute_with(&ThreadSleeper, operation, || {
            std::future::ready(f())
        }))
    }

    /// The retry loop itself, with an explicit [`Sleeper`].
    pub async fn execute_with<S, F, Fut, T, E>(
        &self,
        sleeper: &S,
        operation: &str,
        mut f: F,
    ) -> Result<T, ResilienceError<E>>
    where
        S: Sleeper + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Categorized + Display,
    {
        let metrics = RetryMetrics::new(operation);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempts = attempt + 1, "Operation succeeded after retry");
                        metrics.recovered();
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let category = e.category();
                    metrics.attempt_failed(category);

                    if !self.config.is_retryable(category) {
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            %category,
                            error = %e,
                            "Non-retryable failure, not retrying"
                        );
                        metrics.fatal();
                        return Err(ResilienceError::Failed(e));
                    }

                    if attempt + 1 >= max_attempts {
                        error!(
                            operation,
                            attempts = attempt + 1,
                            %category,
                            error = %e,
                            "Retry attempts exhausted"
                        );
                        metrics.exhausted();
                        return Err(ResilienceError::RetryExhausted {
                            operation: operation.to_string(),
                            attempts: attempt + 1,
                            source: e,
                        });
                    }

                    let delay = self.config.delay_for(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );

                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::test_support::TestError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            self.delays.lock().unwrap().push(duration);
            Box::pin(futures::future::ready(()))
        }
    }

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(max_attempts)
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60))
            .without_jitter()
    }

    #[test]
    fn test_delay_sequence_without_jitter() {
        let config = config(4);
        let delays: Vec<_> = (0..4).map(|a| config.base_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = config(20);
        assert_eq!(config.base_delay(6), Duration::from_secs(60));
        assert_eq!(config.base_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_within_ten_percent() {
        let config = RetryConfig::new().with_min_delay(Duration::from_secs(10));
        for _ in 0..100 {
            let delay = config.delay_for(0).as_secs_f64();
            assert!((9.0..=11.0).contains(&delay), "delay {delay} outside ±10%");
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let sleeper = RecordingSleeper::default();

        let result = RetryExecutor::new(config(3))
            .execute_with(&sleeper, "flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestError::transient("not yet"))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_non_retryable_invoked_once() {
        let calls = AtomicU32::new(0);
        let sleeper = RecordingSleeper::default();

        let err = RetryExecutor::new(config(5))
            .execute_with(&sleeper, "validate", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::permanent("bad input"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Failed(ref e) if e.message == "bad input"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let sleeper = RecordingSleeper::default();

        let err = RetryExecutor::new(config(3))
            .execute_with(&sleeper, "upload", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::transient(&format!("failure {n}")))
            })
            .await
            .unwrap_err();

        match err {
            ResilienceError::RetryExhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "upload");
                assert_eq!(attempts, 3);
                assert_eq!(source.message, "failure 2");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_never_sleeps() {
        let sleeper = RecordingSleeper::default();
        let err = RetryExecutor::new(config(1))
            .execute_with(&sleeper, "once", || async {
                Err::<(), _>(TestError::transient("nope"))
            })
            .await
            .unwrap_err();

        assert!(err.is_retry_exhausted());
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loops_sleep_independently() {
        let executor = Arc::new(RetryExecutor::new(config(3)));
        let start = tokio::time::Instant::now();

        let run = |executor: Arc<RetryExecutor>| async move {
            let calls = AtomicU32::new(0);
            executor
                .execute("parallel", || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::transient("busy"))
                    } else {
                        Ok(())
                    }
                })
                .await
        };

        let (a, b) = tokio::join!(run(executor.clone()), run(executor.clone()));
        a.unwrap();
        b.unwrap();

        // Each loop waits 1s + 2s; run side by side they finish together.
        assert!(start.elapsed() < Duration::from_secs(6));
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn test_execute_blocking() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(
            config(3)
                .with_min_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        );

        let result = executor.execute_blocking("sync_io", || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TestError::transient("first try"))
            } else {
                Ok(7)
            }
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_custom_retry_on() {
        let config = RetryConfig::new().with_retry_on([ErrorCategory::Timeout]);
        assert!(config.is_retryable(ErrorCategory::Timeout));
        assert!(!config.is_retryable(ErrorCategory::Transient));
    }

    #[test]
    fn test_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::new().with_max_attempts(0).validate().is_err());
        assert!(RetryConfig::new().with_backoff_factor(1.0).validate().is_err());
        assert!(RetryConfig::new()
            .with_min_delay(Duration::from_secs(120))
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("RETRY_MAX_ATTEMPTS", Some("5")),
                ("RETRY_MIN_DELAY_MS", Some("250")),
                ("RETRY_MAX_DELAY_MS", Some("4000")),
                ("RETRY_BACKOFF_FACTOR", Some("3.0")),
                ("RETRY_JITTER", Some("false")),
                ("RETRY_ON", None),
            ],
            || {
                let config = RetryConfig::from_env().unwrap();
                assert_eq!(config.max_attempts, 5);
                assert_eq!(config.min_delay, Duration::from_millis(250));
                assert_eq!(config.max_delay, Duration::from_millis(4000));
                assert_eq!(config.backoff_factor, 3.0);
                assert!(!config.jitter);
                assert!(!config.is_retryable(ErrorCategory::Permanent));
            },
        );
    }

    #[test]
    fn test_from_env_rejects_invalid_factor() {
        temp_env::with_var("RETRY_BACKOFF_FACTOR", Some("0.5"), || {
            assert!(RetryConfig::from_env().is_err());
        });
    }
}
