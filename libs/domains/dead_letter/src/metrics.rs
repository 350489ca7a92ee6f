//! Prometheus metrics for the dead-letter queue
//!
//! Exported through the recorder installed by `resilience::init_metrics`.

use metrics::{counter, gauge};

use crate::models::{JobStats, JobStatus};

/// Per-job-type DLQ metrics helper
#[derive(Clone, Debug)]
pub struct DlqMetrics {
    job_type: String,
}

impl DlqMetrics {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }

    /// Record a failed job entering the queue
    pub fn job_added(&self) {
        counter!(
            "dlq_jobs_added_total",
            "job_type" => self.job_type.clone()
        )
        .increment(1);
    }

    /// Record a failed reprocessing attempt that scheduled another retry
    pub fn job_retry_scheduled(&self) {
        counter!(
            "dlq_jobs_retry_scheduled_total",
            "job_type" => self.job_type.clone()
        )
        .increment(1);
    }

    /// Record a job running out of retries
    pub fn job_dead_lettered(&self) {
        counter!(
            "dlq_jobs_dead_lettered_total",
            "job_type" => self.job_type.clone()
        )
        .increment(1);
    }

    /// Record a job resolved by reprocessing
    pub fn job_resolved(&self) {
        counter!(
            "dlq_jobs_resolved_total",
            "job_type" => self.job_type.clone()
        )
        .increment(1);
    }
}

/// Record jobs removed by the retention sweep
pub fn record_cleanup(deleted: u64) {
    counter!("dlq_jobs_cleaned_up_total").increment(deleted);
}

/// Publish per-status job counts as gauges
pub fn record_stats(stats: &JobStats) {
    for status in JobStatus::ALL {
        gauge!("dlq_jobs", "status" => status.to_string()).set(stats.get(status) as f64);
    }
    gauge!("dlq_jobs_total").set(stats.total_jobs as f64);
}
