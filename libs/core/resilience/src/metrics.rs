//! Prometheus metrics for breakers and retry loops
//!
//! Recorded through the `metrics` facade; nothing is exported until
//! [`init_metrics`] installs the Prometheus recorder.

use crate::circuit_breaker::CircuitState;
use crate::error::ErrorCategory;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. Returns `false`
/// if another recorder was already installed by someone else.
pub fn init_metrics() -> bool {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics initialized");
            Ok::<_, BuildError>(handle)
        })
        .map_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
        .is_ok()
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Per-breaker metrics helper
#[derive(Clone, Debug)]
pub struct BreakerMetrics {
    breaker: String,
}

impl BreakerMetrics {
    pub fn new(breaker: impl Into<String>) -> Self {
        Self {
            breaker: breaker.into(),
        }
    }

    /// Record a state transition and update the state gauge
    pub fn transition(&self, state: CircuitState) {
        counter!(
            "resilience_circuit_breaker_transitions_total",
            "breaker" => self.breaker.clone(),
            "state" => state.to_string()
        )
        .increment(1);

        gauge!(
            "resilience_circuit_breaker_state",
            "breaker" => self.breaker.clone()
        )
        .set(state.as_metric_value());
    }

    /// Record a call refused by an open circuit
    pub fn rejected(&self) {
        counter!(
            "resilience_circuit_breaker_rejected_total",
            "breaker" => self.breaker.clone()
        )
        .increment(1);
    }

    /// Record a tracked failure
    pub fn failure(&self) {
        counter!(
            "resilience_circuit_breaker_failures_total",
            "breaker" => self.breaker.clone()
        )
        .increment(1);
    }
}

/// Per-operation retry metrics helper
#[derive(Clone, Debug)]
pub struct RetryMetrics {
    operation: String,
}

impl RetryMetrics {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    /// Record a failed attempt
    pub fn attempt_failed(&self, category: ErrorCategory) {
        counter!(
            "resilience_retry_attempt_failures_total",
            "operation" => self.operation.clone(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    /// Record an operation that succeeded after at least one retry
    pub fn recovered(&self) {
        counter!(
            "resilience_retry_recovered_total",
            "operation" => self.operation.clone()
        )
        .increment(1);
    }

    /// Record an operation that spent its whole attempt budget
    pub fn exhausted(&self) {
        counter!(
            "resilience_retry_exhausted_total",
            "operation" => self.operation.clone()
        )
        .increment(1);
    }

    /// Record a non-retryable failure
    pub fn fatal(&self) {
        counter!(
            "resilience_retry_fatal_total",
            "operation" => self.operation.clone()
        )
        .increment(1);
    }
}
