use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::{DeadLetterConfig, MAX_RETENTION_DAYS};
use crate::error::{DeadLetterError, DeadLetterResult};
use crate::metrics::{self, DlqMetrics};
use crate::models::{DeadLetterJob, JobFailure, JobStats, JobStatus, NewDeadLetterJob};
use crate::repository::DeadLetterRepository;

/// Service layer for the dead-letter queue
///
/// The queue never drops a job on its own: a job leaves only through
/// [`DeadLetterQueue::mark_job_resolved`] followed by the retention sweep.
pub struct DeadLetterQueue<R: DeadLetterRepository> {
    repository: Arc<R>,
    config: DeadLetterConfig,
}

impl<R: DeadLetterRepository> Clone for DeadLetterQueue<R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R: DeadLetterRepository> DeadLetterQueue<R> {
    pub fn new(repository: R, config: DeadLetterConfig) -> Self {
        Self {
            repository: Arc::new(repository),
            config,
        }
    }

    pub fn config(&self) -> &DeadLetterConfig {
        &self.config
    }

    /// Persist a failed job in PENDING and return its id
    #[instrument(skip(self, input), fields(job_type = %input.job_type))]
    pub async fn add_failed_job(&self, mut input: NewDeadLetterJob) -> DeadLetterResult<Uuid> {
        input.validate()?;
        input.max_retries.get_or_insert(self.config.default_max_retries);

        let job = self.repository.create(input).await?;

        info!(
            job_id = %job.id,
            error_type = job.error_type.as_deref().unwrap_or_default(),
            max_retries = job.max_retries,
            "Failed job added to dead letter queue"
        );
        DlqMetrics::new(&job.job_type).job_added();

        Ok(job.id)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn get_job(&self, id: Uuid) -> DeadLetterResult<DeadLetterJob> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or(DeadLetterError::NotFound(id))
    }

    /// Jobs due for another attempt, oldest first. `limit` defaults to the
    /// configured batch size.
    #[instrument(skip(self))]
    pub async fn get_retryable_jobs(
        &self,
        job_type: Option<&str>,
        limit: Option<u64>,
    ) -> DeadLetterResult<Vec<DeadLetterJob>> {
        let jobs = self
            .repository
            .list_retryable(
                job_type.map(str::to_string),
                limit.unwrap_or(self.config.batch_limit),
                Utc::now(),
            )
            .await?;

        info!(count = jobs.len(), "Retrieved retryable jobs");
        Ok(jobs)
    }

    /// Claim a job for processing. Only PENDING, RETRYING and FAILED jobs can
    /// be claimed: `false` if the job does not exist, another worker already
    /// holds it (PROCESSING), or it is DEAD_LETTER or RESOLVED.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn mark_job_processing(&self, id: Uuid) -> DeadLetterResult<bool> {
        let claimed = self.repository.mark_processing(id, Utc::now()).await?;
        if claimed {
            info!("Job marked as processing");
        }
        Ok(claimed)
    }

    /// Give up a claim without spending an attempt, restoring the status and
    /// `next_retry_at` the job had when it was fetched. `false` if the job is
    /// gone or no longer PROCESSING.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn release_job(&self, job: &DeadLetterJob) -> DeadLetterResult<bool> {
        let released = self
            .repository
            .release(job.id, job.status, job.next_retry_at, Utc::now())
            .await?;
        if released {
            info!(status = %job.status, "Job claim released");
        }
        Ok(released)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn mark_job_resolved(&self, id: Uuid) -> DeadLetterResult<bool> {
        let resolved = self.repository.mark_resolved(id, Utc::now()).await?;
        if resolved {
            info!("Job marked as resolved");
        }
        Ok(resolved)
    }

    /// Record a failed attempt. Moves the job to RETRYING with a fresh
    /// `next_retry_at`, or to DEAD_LETTER once its budget is spent.
    /// `false` if the job does not exist.
    #[instrument(skip(self, error_message), fields(job_id = %id))]
    pub async fn increment_retry_count(
        &self,
        id: Uuid,
        error_message: Option<String>,
        error_type: Option<String>,
    ) -> DeadLetterResult<bool> {
        let failure = JobFailure {
            error_message,
            error_type,
        };

        let Some(job) = self
            .repository
            .record_failure(id, failure, self.config.backoff(), Utc::now())
            .await?
        else {
            return Ok(false);
        };

        let metrics = DlqMetrics::new(&job.job_type);
        match job.status {
            JobStatus::DeadLetter => {
                warn!(
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    "Job moved to dead letter status"
                );
                metrics.job_dead_lettered();
            }
            _ => {
                info!(
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    next_retry_at = ?job.next_retry_at,
                    "Job retry scheduled"
                );
                metrics.job_retry_scheduled();
            }
        }

        Ok(true)
    }

    /// Dead-lettered jobs, newest first
    #[instrument(skip(self))]
    pub async fn get_dead_letter_jobs(
        &self,
        job_type: Option<&str>,
        limit: Option<u64>,
    ) -> DeadLetterResult<Vec<DeadLetterJob>> {
        let jobs = self
            .repository
            .list_dead_letter(
                job_type.map(str::to_string),
                limit.unwrap_or(self.config.batch_limit),
            )
            .await?;

        info!(count = jobs.len(), "Retrieved dead letter jobs");
        Ok(jobs)
    }

    #[instrument(skip(self))]
    pub async fn get_job_stats(&self) -> DeadLetterResult<JobStats> {
        let counts = self.repository.count_by_status().await?;
        let stats = JobStats::from_counts(&counts);

        info!(
            total = stats.total_jobs,
            pending = stats.pending_jobs,
            processing = stats.processing_jobs,
            failed = stats.failed_jobs,
            retrying = stats.retrying_jobs,
            dead_letter = stats.dead_letter_jobs,
            resolved = stats.resolved_jobs,
            "Retrieved job stats"
        );
        Ok(stats)
    }

    /// Delete RESOLVED jobs resolved more than `older_than_days` ago. Jobs in
    /// any other status are never touched. Retentions beyond
    /// [`MAX_RETENTION_DAYS`] are treated as that maximum.
    #[instrument(skip(self))]
    pub async fn cleanup_resolved_jobs(&self, older_than_days: u32) -> DeadLetterResult<u64> {
        let cutoff = retention_cutoff(Utc::now(), older_than_days);
        let deleted = self.repository.delete_resolved_before(cutoff).await?;

        info!(deleted, "Cleaned up resolved jobs");
        metrics::record_cleanup(deleted);
        Ok(deleted)
    }

    /// Put a dead-lettered job, or one stuck in PROCESSING, back in the queue
    /// with a fresh retry budget
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn requeue_dead_letter(&self, id: Uuid) -> DeadLetterResult<DeadLetterJob> {
        let job = self.repository.requeue(id, Utc::now()).await?;
        info!(job_type = %job.job_type, "Dead letter job requeued");
        Ok(job)
    }
}

/// `now - older_than_days`, with the retention capped at
/// [`MAX_RETENTION_DAYS`] so the cutoff stays a storable timestamp.
fn retention_cutoff(now: DateTime<Utc>, older_than_days: u32) -> DateTime<Utc> {
    let days = older_than_days.min(MAX_RETENTION_DAYS);
    now - TimeDelta::days(i64::from(days))
}
