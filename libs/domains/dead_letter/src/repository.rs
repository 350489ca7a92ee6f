use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::DeadLetterResult;
use crate::models::{DeadLetterJob, JobFailure, JobStatus, NewDeadLetterJob, RequeueBackoff};

/// Repository trait for dead-letter job persistence
///
/// Every mutating call runs inside one transaction of the backing store, so
/// several worker processes may share a table. Claiming a job with
/// `mark_processing` before working it is the only locking discipline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    /// Insert a new PENDING job
    async fn create(&self, input: NewDeadLetterJob) -> DeadLetterResult<DeadLetterJob>;

    async fn get_by_id(&self, id: Uuid) -> DeadLetterResult<Option<DeadLetterJob>>;

    /// PENDING or RETRYING jobs with budget left that are due at `now`, oldest first
    async fn list_retryable(
        &self,
        job_type: Option<String>,
        limit: u64,
        now: DateTime<Utc>,
    ) -> DeadLetterResult<Vec<DeadLetterJob>>;

    /// DEAD_LETTER jobs, newest first
    async fn list_dead_letter(
        &self,
        job_type: Option<String>,
        limit: u64,
    ) -> DeadLetterResult<Vec<DeadLetterJob>>;

    /// Claim a job. `false` when it does not exist or is not claimable.
    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> DeadLetterResult<bool>;

    /// `false` when the job does not exist
    async fn mark_resolved(&self, id: Uuid, now: DateTime<Utc>) -> DeadLetterResult<bool>;

    /// Apply a failed attempt; `None` when the job does not exist
    async fn record_failure(
        &self,
        id: Uuid,
        failure: JobFailure,
        backoff: RequeueBackoff,
        now: DateTime<Utc>,
    ) -> DeadLetterResult<Option<DeadLetterJob>>;

    /// Hand back a claim without counting an attempt: PROCESSING returns to
    /// `status` with `next_retry_at` restored. `false` when the job does not
    /// exist or is no longer PROCESSING.
    async fn release(
        &self,
        id: Uuid,
        status: JobStatus,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DeadLetterResult<bool>;

    /// Move a DEAD_LETTER (or stuck PROCESSING) job back to PENDING with a
    /// fresh budget
    async fn requeue(&self, id: Uuid, now: DateTime<Utc>) -> DeadLetterResult<DeadLetterJob>;

    async fn count_by_status(&self) -> DeadLetterResult<HashMap<JobStatus, u64>>;

    /// Delete RESOLVED jobs resolved before `cutoff`; returns rows removed
    async fn delete_resolved_before(&self, cutoff: DateTime<Utc>) -> DeadLetterResult<u64>;
}
