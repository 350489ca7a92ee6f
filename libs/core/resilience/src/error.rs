//! Error taxonomy for protected calls
//!
//! Every error that flows through a breaker or the retry executor is
//! classified into an [`ErrorCategory`]:
//! - **Retryable** categories are absorbed by the retry executor up to its attempt budget
//! - **Everything else** is fatal and propagated immediately, bypassing backoff
//! - A breaker only counts failures whose category it tracks
//!
//! [`ResilienceError`] is what callers get back. It keeps the circuit-open fast
//! path distinct from genuine downstream failures.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

/// Category of error for determining retry and breaker behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Temporary failure, worth another attempt
    Transient,
    /// The downstream call timed out
    Timeout,
    /// The downstream dependency is unreachable or refusing work
    Unavailable,
    /// Rate limit hit on the downstream side
    RateLimited,
    /// Unrecoverable error, never retried
    Permanent,
}

impl ErrorCategory {
    /// Get all category variants.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// Categories the retry executor retries when the caller does not say otherwise.
    pub fn default_retryable() -> impl Iterator<Item = Self> {
        Self::iter().filter(|c| *c != ErrorCategory::Permanent)
    }

    /// Parse a comma separated list such as `"transient, timeout"`.
    pub fn parse_list(raw: &str) -> Result<HashSet<Self>, strum::ParseError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

/// Classifies an error so retry and breaker policies can act on it.
///
/// Implement this for the error type returned by your unit of work.
pub trait Categorized {
    fn category(&self) -> ErrorCategory;
}

/// Error returned by protected calls.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// The breaker refused to attempt the call. Carries no downstream detail.
    #[error("Circuit breaker {name} is OPEN")]
    CircuitOpen { name: String },

    /// Every attempt failed with a retryable error; `source` is the last one.
    #[error("Operation {operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The underlying failure, passed through untouched.
    #[error("{0}")]
    Failed(#[source] E),
}

impl<E> ResilienceError<E> {
    /// True when the call was never attempted because the breaker is open.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// True when the retry budget was spent.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, ResilienceError::RetryExhausted { .. })
    }

    /// The downstream error, if there is one.
    pub fn inner(&self) -> Option<&E> {
        match self {
            ResilienceError::CircuitOpen { .. } => None,
            ResilienceError::RetryExhausted { source, .. } => Some(source),
            ResilienceError::Failed(e) => Some(e),
        }
    }

    /// Consume and return the downstream error, if there is one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::CircuitOpen { .. } => None,
            ResilienceError::RetryExhausted { source, .. } => Some(source),
            ResilienceError::Failed(e) => Some(e),
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::CircuitOpen { .. } => "circuit_open",
            ResilienceError::RetryExhausted { .. } => "retry_exhausted",
            ResilienceError::Failed(_) => "failed",
        }
    }
}

impl<E> ResilienceError<ResilienceError<E>> {
    /// Collapse a breaker error wrapped around a retry error.
    ///
    /// Breakers only ever produce `CircuitOpen` or `Failed`, so the nested
    /// `RetryExhausted` arm just unwraps to the inner error.
    pub fn flatten(self) -> ResilienceError<E> {
        match self {
            ResilienceError::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            ResilienceError::Failed(inner) => inner,
            ResilienceError::RetryExhausted { source, .. } => source,
        }
    }
}

impl<E: Categorized> Categorized for ResilienceError<E> {
    fn category(&self) -> ErrorCategory {
        match self {
            ResilienceError::CircuitOpen { .. } => ErrorCategory::Unavailable,
            ResilienceError::RetryExhausted { source, .. } => source.category(),
            ResilienceError::Failed(e) => e.category(),
        }
    }
}
