//! Circuit breaker for calls to downstream dependencies.
//!
//! ## States
//!
//! ```text
//! ┌─────────┐  failures >= threshold  ┌────────┐
//! │ CLOSED  │ ──────────────────────> │  OPEN  │
//! └─────────┘                         └────────┘
//!      ^                                   │
//!      │                                   │ recovery timeout elapsed
//!      │                                   v
//!      │      success            ┌─────────────┐
//!      └──────────────────────── │ HALF-OPEN   │
//!                                └─────────────┘
//!                                      │
//!                       failure        │  (straight back to OPEN)
//!                       ───────────────┘
//! ```
//!
//! A single success heals the breaker from any state. The half-open state
//! admits exactly one trial call; concurrent callers fail fast until the
//! trial finishes.
//!
//! Every state mutation happens under one mutex, so concurrent failures cannot
//! both slip past the threshold and a success cannot interleave with a failure.
//!
//! Breaker state is per process. Several worker processes using the same
//! breaker name each keep their own view of the dependency.
//!
//! ## Example
//!
//! ```rust,ignore
//! use resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "embeddings",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_recovery_timeout(Duration::from_secs(60)),
//! );
//!
//! let vectors = breaker.call(|| client.embed(&chunks)).await?;
//! ```

use chrono::{DateTime, Utc};
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use strum::{AsRefStr, Display};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Categorized, ErrorCategory, ResilienceError};
use crate::metrics::BreakerMetrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected immediately.
    Open,
    /// Circuit is half-open, one trial request tests recovery.
    HalfOpen,
}

impl CircuitState {
    /// Convert to Prometheus metric value (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_metric_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to wait in open state before admitting a trial call.
    pub recovery_timeout: Duration,
    /// Error categories counted as failures. Others pass through uncounted.
    pub tracked: HashSet<ErrorCategory>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            tracked: ErrorCategory::all().collect(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the recovery timeout.
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Restrict which error categories count as failures.
    pub fn with_tracked(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.tracked = categories.into_iter().collect();
        self
    }

    /// Whether failures of this category move the breaker.
    pub fn tracks(&self, category: ErrorCategory) -> bool {
        self.tracked.contains(&category)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "failure_threshold",
                "must be at least 1",
            ));
        }
        if self.tracked.is_empty() {
            return Err(ConfigError::invalid(
                "tracked",
                "at least one error category must be tracked",
            ));
        }
        Ok(())
    }
}

/// Environment variables:
/// - `CIRCUIT_BREAKER_FAILURE_THRESHOLD` (default: 5)
/// - `CIRCUIT_BREAKER_RECOVERY_TIMEOUT_SECS` (default: 60)
/// - `CIRCUIT_BREAKER_TRACKED` (comma separated categories, default: all)
impl FromEnv for CircuitBreakerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let failure_threshold = env_parse("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?;
        let recovery_timeout_secs: u64 = env_parse("CIRCUIT_BREAKER_RECOVERY_TIMEOUT_SECS", "60")?;

        let tracked_raw = env_or_default("CIRCUIT_BREAKER_TRACKED", "");
        let tracked = if tracked_raw.trim().is_empty() {
            ErrorCategory::all().collect()
        } else {
            ErrorCategory::parse_list(&tracked_raw).map_err(|e| ConfigError::ParseError {
                key: "CIRCUIT_BREAKER_TRACKED".to_string(),
                details: e.to_string(),
            })?
        };

        let config = Self {
            failure_threshold,
            recovery_timeout: Duration::from_secs(recovery_timeout_secs),
            tracked,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Read-only view of a breaker, for dashboards and the registry.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_count: u64,
    pub rejected_count: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    opened_count: u64,
    rejected_count: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
            trial_in_flight: false,
            opened_count: 0,
            rejected_count: 0,
        }
    }
}

/// Thread-safe, named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    metrics: BreakerMetrics,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        Self {
            metrics: BreakerMetrics::new(name.clone()),
            name,
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    /// Create a circuit breaker with default configuration.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get the failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Whether a call made now would be attempted. Changes no state.
    pub fn is_accepting_calls(&self) -> bool {
        let state = self.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => state
                .last_failure
                .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout),
            CircuitState::HalfOpen => !state.trial_in_flight,
        }
    }

    /// Snapshot of the breaker's counters.
    pub fn metrics(&self) -> CircuitBreakerSnapshot {
        let state = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs_f64(),
            last_failure_at: state.last_failure_at,
            opened_count: state.opened_count,
            rejected_count: state.rejected_count,
        }
    }

    /// Force the breaker closed with a clean slate. Operator use only.
    pub fn reset(&self) {
        let mut state = self.lock();
        let previous = state.state;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure = None;
        state.last_failure_at = None;
        state.trial_in_flight = false;
        drop(state);

        info!(breaker = %self.name, from = %previous, "Circuit breaker manually reset");
        if previous != CircuitState::Closed {
            self.metrics.transition(CircuitState::Closed);
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Fails fast with [`ResilienceError::CircuitOpen`] without invoking
    /// `operation` while the circuit is open. Otherwise the operation's own
    /// error is returned as [`ResilienceError::Failed`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Categorized,
    {
        let admission = self.admit().ok_or_else(|| self.open_error())?;
        let outcome = operation().await;
        admission.record(&outcome);
        outcome.map_err(ResilienceError::Failed)
    }

    /// Blocking counterpart of [`CircuitBreaker::call`] for synchronous work.
    pub fn call_blocking<F, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: Categorized,
    {
        let admission = self.admit().ok_or_else(|| self.open_error())?;
        let outcome = operation();
        admission.record(&outcome);
        outcome.map_err(ResilienceError::Failed)
    }

    // Internal methods

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_error<E>(&self) -> ResilienceError<E> {
        ResilienceError::CircuitOpen {
            name: self.name.clone(),
        }
    }

    /// Decide whether a call may proceed, moving OPEN to HALF_OPEN when the
    /// recovery timeout has elapsed.
    fn admit(&self) -> Option<Admission<'_>> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Some(Admission::new(self, false)),
            CircuitState::Open => {
                let elapsed = state
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);

                if elapsed {
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    drop(state);

                    info!(breaker = %self.name, "Circuit breaker HALF-OPEN (testing recovery)");
                    self.metrics.transition(CircuitState::HalfOpen);
                    Some(Admission::new(self, true))
                } else {
                    state.rejected_count += 1;
                    drop(state);

                    debug!(breaker = %self.name, "Circuit breaker OPEN, rejecting call");
                    self.metrics.rejected();
                    None
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    state.rejected_count += 1;
                    drop(state);

                    debug!(breaker = %self.name, "Trial call in flight, rejecting call");
                    self.metrics.rejected();
                    None
                } else {
                    state.trial_in_flight = true;
                    Some(Admission::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, state: &mut BreakerState) {
        let previous = state.state;
        state.failure_count = 0;
        state.state = CircuitState::Closed;

        if previous != CircuitState::Closed {
            info!(breaker = %self.name, from = %previous, "Circuit breaker CLOSED (recovered)");
            self.metrics.transition(CircuitState::Closed);
        }
    }

    fn on_failure(&self, state: &mut BreakerState) {
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());
        self.metrics.failure();

        let should_open = state.state == CircuitState::HalfOpen
            || state.failure_count >= self.config.failure_threshold;

        if should_open && state.state != CircuitState::Open {
            state.state = CircuitState::Open;
            state.opened_count += 1;
            warn!(
                breaker = %self.name,
                failure_count = state.failure_count,
                threshold = self.config.failure_threshold,
                "Circuit breaker OPENED"
            );
            self.metrics.transition(CircuitState::Open);
        }
    }
}

/// Permission to make one call. Dropping it without recording releases a
/// half-open trial slot so a cancelled trial cannot wedge the breaker.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self { breaker, trial }
    }

    fn record<T, E: Categorized>(mut self, outcome: &Result<T, E>) {
        let mut state = self.breaker.lock();

        match outcome {
            Ok(_) => self.breaker.on_success(&mut state),
            Err(e) if self.breaker.config.tracks(e.category()) => {
                self.breaker.on_failure(&mut state)
            }
            Err(e) => debug!(
                breaker = %self.breaker.name,
                category = %e.category(),
                "Untracked failure, breaker unchanged"
            ),
        }

        if self.trial {
            state.trial_in_flight = false;
            self.trial = false;
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.trial {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}
