//! Periodic dead-letter housekeeping
//!
//! Each pass deletes RESOLVED jobs past their retention and publishes the
//! per-status job counts as gauges. Both steps go through a [`Resilient`]
//! handle, so a flapping database trips the `postgres` breaker instead of
//! being hammered every interval.

use domain_dead_letter::metrics::record_stats;
use domain_dead_letter::{DeadLetterError, DeadLetterQueue, DeadLetterRepository, JobStats};
use resilience::{ResilienceError, Resilient};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

/// What one pass did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub deleted: u64,
    pub stats: JobStats,
}

pub struct Maintenance<R: DeadLetterRepository> {
    queue: DeadLetterQueue<R>,
    resilient: Resilient,
}

impl<R: DeadLetterRepository> Maintenance<R> {
    pub fn new(queue: DeadLetterQueue<R>, resilient: Resilient) -> Self {
        Self { queue, resilient }
    }

    pub fn queue(&self) -> &DeadLetterQueue<R> {
        &self.queue
    }

    /// Sweep expired resolved jobs, then refresh the status gauges.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<MaintenanceReport, ResilienceError<DeadLetterError>> {
        let retention_days = self.queue.config().retention_days;

        let deleted = self
            .resilient
            .run("dlq_cleanup", || self.queue.cleanup_resolved_jobs(retention_days))
            .await?;

        let stats = self
            .resilient
            .run("dlq_stats", || self.queue.get_job_stats())
            .await?;
        record_stats(&stats);

        info!(
            deleted,
            retention_days,
            total = stats.total_jobs,
            pending = stats.pending_jobs,
            retrying = stats.retrying_jobs,
            dead_letter = stats.dead_letter_jobs,
            "Maintenance pass complete"
        );

        Ok(MaintenanceReport { deleted, stats })
    }

    /// Run a pass every `interval` until `shutdown` flips to `true`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "Maintenance loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(_) => {}
                        Err(e) if e.is_circuit_open() => {
                            warn!(error = %e, "Skipping maintenance pass");
                        }
                        Err(e) => error!(error = %e, kind = e.kind(), "Maintenance pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Maintenance loop stopped");
    }
}
