//! Resilience primitives for calls to downstream dependencies.
//!
//! - [`CircuitBreaker`]: fails fast while a dependency is deemed unhealthy
//! - [`RetryExecutor`]: bounded retries with exponential backoff and jitter
//! - [`CircuitBreakerRegistry`]: shares breaker state between call sites by name
//! - [`Resilient`] / [`retry_with_circuit_breaker`]: the two combined, breaker outermost
//!
//! Errors flowing through these types implement [`Categorized`] so policies
//! can decide what to retry and what to count.
//!
//! ## Example
//!
//! ```rust,ignore
//! use resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, Resilient, RetryConfig};
//!
//! let registry = CircuitBreakerRegistry::new();
//! let storage = Resilient::from_registry(
//!     &registry,
//!     "object-storage",
//!     CircuitBreakerConfig::default(),
//!     RetryConfig::default(),
//! );
//!
//! let bytes = storage.run("download", || client.get(&key)).await?;
//! ```

pub mod circuit_breaker;
pub mod compose;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use compose::{retry_with_circuit_breaker, Resilient};
pub use error::{Categorized, ErrorCategory, ResilienceError};
pub use metrics::{init_metrics, prometheus_handle, render_metrics};
pub use registry::CircuitBreakerRegistry;
pub use retry::{RetryConfig, RetryExecutor, Sleeper, ThreadSleeper, TokioSleeper};
