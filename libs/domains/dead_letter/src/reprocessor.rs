//! Scheduled reprocessing of dead-letter jobs
//!
//! ```text
//! get_retryable_jobs(job_type)
//!   ↓ for each job
//! mark_job_processing  ── claimed by someone else ──> skip
//!   ↓
//! Resilient::run(handler.handle)   (breaker around retry)
//!   ↓ ok                      ↓ err
//! mark_job_resolved     increment_retry_count(error, category)
//! ```
//!
//! The batch stops early when the dependency's breaker refuses calls, so
//! jobs are not claimed only to be failed without an attempt. A job whose
//! claim raced a breaker opening is released back to its previous status
//! with its retry budget untouched.
//!
//! A bookkeeping error on one job (resolve or failure record) is logged and
//! the pass moves on. Such a job stays PROCESSING until an operator calls
//! `requeue_dead_letter` on it.

use async_trait::async_trait;
use resilience::{Categorized, ErrorCategory, Resilient};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DeadLetterResult;
use crate::metrics::DlqMetrics;
use crate::models::DeadLetterJob;
use crate::repository::DeadLetterRepository;
use crate::service::DeadLetterQueue;

/// Failure reported by a [`JobHandler`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    pub category: ErrorCategory,
}

impl JobError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permanent, message)
    }
}

impl Categorized for JobError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}

/// Re-executes one kind of dead-lettered work.
///
/// # Example
///
/// ```rust,ignore
/// struct ReindexHandler { index: SearchClient }
///
/// #[async_trait]
/// impl JobHandler for ReindexHandler {
///     fn job_type(&self) -> &str {
///         "reindex_document"
///     }
///
///     async fn handle(&self, job: &DeadLetterJob) -> Result<(), JobError> {
///         let id = job.payload["document_id"].as_str().ok_or_else(|| JobError::permanent("missing document_id"))?;
///         self.index.reindex(id).await.map_err(|e| JobError::transient(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job type this handler picks up
    fn job_type(&self) -> &str;

    async fn handle(&self, job: &DeadLetterJob) -> Result<(), JobError>;
}

/// Outcome of one reprocessing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReprocessSummary {
    pub fetched: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Claimed by another worker, or left for later because the breaker is open
    pub skipped: usize,
}

/// Polls the queue for one job type and feeds due jobs to a handler
pub struct DeadLetterReprocessor<R: DeadLetterRepository, H: JobHandler> {
    queue: DeadLetterQueue<R>,
    handler: Arc<H>,
    resilient: Resilient,
}

impl<R: DeadLetterRepository, H: JobHandler> DeadLetterReprocessor<R, H> {
    pub fn new(queue: DeadLetterQueue<R>, handler: H, resilient: Resilient) -> Self {
        Self {
            queue,
            handler: Arc::new(handler),
            resilient,
        }
    }

    /// Process every job due right now, up to the queue's batch limit.
    #[instrument(skip(self), fields(job_type = %self.handler.job_type()))]
    pub async fn run_once(&self) -> DeadLetterResult<ReprocessSummary> {
        let job_type = self.handler.job_type();
        let jobs = self.queue.get_retryable_jobs(Some(job_type), None).await?;
        let metrics = DlqMetrics::new(job_type);

        let mut summary = ReprocessSummary {
            fetched: jobs.len(),
            ..Default::default()
        };

        for (index, job) in jobs.iter().enumerate() {
            if !self.resilient.breaker().is_accepting_calls() {
                let remaining = jobs.len() - index;
                warn!(
                    breaker = %self.resilient.breaker().name(),
                    remaining,
                    "Circuit breaker open, deferring remaining jobs"
                );
                summary.skipped += remaining;
                break;
            }

            match self.queue.mark_job_processing(job.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.id, "Job already claimed, skipping");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to claim job, skipping");
                    summary.skipped += 1;
                    continue;
                }
            }

            let handler = &self.handler;
            let outcome = self.resilient.run(job_type, || handler.handle(job)).await;

            match outcome {
                Ok(()) => match self.queue.mark_job_resolved(job.id).await {
                    Ok(_) => {
                        metrics.job_resolved();
                        summary.resolved += 1;
                    }
                    Err(e) => {
                        error!(
                            job_id = %job.id,
                            error = %e,
                            "Job handled but could not be marked resolved"
                        );
                        summary.failed += 1;
                    }
                },
                Err(e) if e.is_circuit_open() => {
                    // Breaker opened after the pre-check; the handler never ran.
                    let remaining = jobs.len() - index;
                    warn!(
                        job_id = %job.id,
                        breaker = %self.resilient.breaker().name(),
                        remaining,
                        "Circuit breaker opened before job ran, releasing claim"
                    );
                    if let Err(release_err) = self.queue.release_job(job).await {
                        error!(job_id = %job.id, error = %release_err, "Failed to release claimed job");
                    }
                    summary.skipped += remaining;
                    break;
                }
                Err(e) => {
                    let error_type = match e.inner() {
                        Some(inner) => inner.category().to_string(),
                        None => e.kind().to_string(),
                    };
                    warn!(job_id = %job.id, error = %e, %error_type, "Reprocessing failed");

                    if let Err(record_err) = self
                        .queue
                        .increment_retry_count(job.id, Some(e.to_string()), Some(error_type))
                        .await
                    {
                        error!(
                            job_id = %job.id,
                            error = %record_err,
                            "Failed to record reprocessing failure"
                        );
                    }
                    summary.failed += 1;
                }
            }
        }

        if summary.fetched > 0 {
            info!(
                fetched = summary.fetched,
                resolved = summary.resolved,
                failed = summary.failed,
                skipped = summary.skipped,
                "Reprocessing pass complete"
            );
        }

        Ok(summary)
    }

    /// Call [`DeadLetterReprocessor::run_once`] every poll interval until
    /// `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.queue.config().poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            job_type = %self.handler.job_type(),
            poll_interval_secs = self.queue.config().poll_interval.as_secs(),
            "Dead letter reprocessor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Reprocessing pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(job_type = %self.handler.job_type(), "Dead letter reprocessor stopped");
    }
}
