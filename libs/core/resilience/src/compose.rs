//! Retry and circuit breaker combined for one call site.
//!
//! The breaker wraps the whole retry sequence, never the other way round.
//! A logical call therefore moves the breaker's failure count by at most one,
//! however many attempts the retry loop made internally.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{Categorized, ResilienceError};
use crate::registry::CircuitBreakerRegistry;
use crate::retry::{RetryConfig, RetryExecutor};

/// Run `f` with retries, the whole sequence guarded by `breaker`.
pub async fn retry_with_circuit_breaker<F, Fut, T, E>(
    breaker: &CircuitBreaker,
    retry: &RetryExecutor,
    operation: &str,
    f: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Categorized + Display,
{
    breaker
        .call(|| retry.execute(operation, f))
        .await
        .map_err(ResilienceError::flatten)
}

/// A breaker and a retry policy bound together, reusable across calls.
///
/// # Example
///
/// ```rust,ignore
/// let registry = CircuitBreakerRegistry::new();
/// let embeddings = Resilient::from_registry(
///     &registry,
///     "embeddings",
///     CircuitBreakerConfig::default(),
///     RetryConfig::default(),
/// );
///
/// let vectors = embeddings.run("embed_chunks", || client.embed(&chunks)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Resilient {
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl Resilient {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryConfig) -> Self {
        Self {
            breaker,
            retry: RetryExecutor::new(retry),
        }
    }

    /// Bind to the registry's breaker for `name`, creating it if needed.
    pub fn from_registry(
        registry: &CircuitBreakerRegistry,
        name: &str,
        breaker: CircuitBreakerConfig,
        retry: RetryConfig,
    ) -> Self {
        Self::new(registry.get_or_create(name, breaker), retry)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub async fn run<F, Fut, T, E>(&self, operation: &str, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Categorized + Display,
    {
        retry_with_circuit_breaker(&self.breaker, &self.retry, operation, f).await
    }

    /// Blocking counterpart of [`Resilient::run`].
    pub fn run_blocking<F, T, E>(&self, operation: &str, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Categorized + Display,
    {
        self.breaker
            .call_blocking(|| self.retry.execute_blocking(operation, f))
            .map_err(ResilienceError::flatten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::error::test_support::TestError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(max_attempts)
            .with_min_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .without_jitter()
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_counts_one_failure_per_logical_call() {
        let breaker = CircuitBreaker::new(
            "composed",
            CircuitBreakerConfig::new().with_failure_threshold(3),
        );
        let retry = RetryExecutor::new(fast_retry(4));
        let attempts = AtomicU32::new(0);

        let err = retry_with_circuit_breaker(&breaker, &retry, "always_down", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::transient("down"))
        })
        .await
        .unwrap_err();

        assert!(err.is_retry_exhausted());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_skips_retry_loop() {
        let registry = CircuitBreakerRegistry::new();
        let resilient = Resilient::from_registry(
            &registry,
            "flaky-dep",
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_recovery_timeout(Duration::from_secs(60)),
            fast_retry(2),
        );
        let attempts = AtomicU32::new(0);

        for _ in 0..2 {
            let _ = resilient
                .run("sync_index", || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::transient("down"))
                })
                .await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(registry.get("flaky-dep").unwrap().state(), CircuitState::Open);

        let err = resilient
            .run("sync_index", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_call_resets_breaker() {
        let resilient = Resilient::new(
            Arc::new(CircuitBreaker::with_defaults("recovering")),
            fast_retry(3),
        );
        let attempts = AtomicU32::new(0);

        let value = resilient
            .run("eventually_ok", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::transient("warming up"))
                } else {
                    Ok(99)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 99);
        assert_eq!(resilient.breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_passes_through_flattened() {
        let resilient = Resilient::new(
            Arc::new(CircuitBreaker::with_defaults("fatal")),
            fast_retry(5),
        );

        let err = resilient
            .run("parse", || async {
                Err::<(), _>(TestError::permanent("malformed"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Failed(ref e) if e.message == "malformed"));
    }

    #[test]
    fn test_run_blocking() {
        let resilient = Resilient::new(
            Arc::new(CircuitBreaker::new(
                "blocking",
                CircuitBreakerConfig::new().with_failure_threshold(1),
            )),
            RetryConfig::new()
                .with_max_attempts(2)
                .with_min_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(2)),
        );

        let err = resilient
            .run_blocking("disk_write", || Err::<(), _>(TestError::transient("EIO")))
            .unwrap_err();
        assert!(err.is_retry_exhausted());
        assert_eq!(resilient.breaker().state(), CircuitState::Open);

        let err = resilient
            .run_blocking("disk_write", || Ok::<_, TestError>(()))
            .unwrap_err();
        assert!(err.is_circuit_open());
    }
}
