use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum::Display;
use uuid::Uuid;
use validator::Validate;

/// Retry budget for jobs that do not set their own.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Dead-letter job lifecycle status
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    Default,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "dead_letter_job_status")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Added, never retried
    #[default]
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Claimed by a worker
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Waiting for `next_retry_at`
    #[sea_orm(string_value = "retrying")]
    Retrying,
    /// Retry budget spent, needs an operator
    #[sea_orm(string_value = "dead_letter")]
    DeadLetter,
    /// Done, eligible for the retention sweep
    #[sea_orm(string_value = "resolved")]
    Resolved,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Failed,
        JobStatus::Retrying,
        JobStatus::DeadLetter,
        JobStatus::Resolved,
    ];

    /// Statuses picked up by the retry scan.
    pub const RETRYABLE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Retrying];

    /// Statuses a worker may claim.
    pub fn is_claimable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Retrying | JobStatus::Failed
        )
    }
}

/// A failed unit of work kept for later reprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub id: Uuid,
    /// Discriminator for the kind of work
    pub job_type: String,
    /// Back-reference to the upstream job, if any
    pub original_job_id: Option<String>,
    /// Enough to re-execute the work
    pub payload: Value,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Caller-defined context
    pub job_metadata: Value,
}

impl DeadLetterJob {
    /// Whether the retry scan would return this job at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        JobStatus::RETRYABLE.contains(&self.status)
            && self.retry_count < self.max_retries
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Apply a failed reprocessing attempt.
    ///
    /// Bumps `retry_count`, then either dead-letters the job once the budget
    /// is spent or schedules the next attempt with `backoff`.
    pub fn record_failure(
        &mut self,
        failure: JobFailure,
        backoff: &RequeueBackoff,
        now: DateTime<Utc>,
    ) -> JobStatus {
        self.retry_count = self.retry_count.saturating_add(1);
        self.updated_at = now;

        if let Some(message) = failure.error_message {
            self.error_message = Some(message);
        }
        if let Some(error_type) = failure.error_type {
            self.error_type = Some(error_type);
        }

        if self.retry_count >= self.max_retries {
            self.status = JobStatus::DeadLetter;
        } else {
            self.status = JobStatus::Retrying;
            self.next_retry_at = Some(backoff.next_retry_at(now, self.retry_count));
        }

        self.status
    }

    /// Operator requeue of a dead-lettered or stuck job with a fresh budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.retry_count = 0;
        self.next_retry_at = None;
        self.updated_at = now;
    }
}

/// Input for adding a failed job
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDeadLetterJob {
    #[validate(length(min = 1, max = 255))]
    pub job_type: String,
    #[validate(length(max = 255))]
    pub original_job_id: Option<String>,
    pub payload: Value,
    pub error_message: String,
    #[validate(length(max = 255))]
    pub error_type: String,
    /// Falls back to the queue's configured default
    #[validate(range(min = 0))]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub job_metadata: Option<Value>,
}

impl NewDeadLetterJob {
    pub fn new(
        job_type: impl Into<String>,
        payload: Value,
        error_message: impl Into<String>,
        error_type: impl Into<String>,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            original_job_id: None,
            payload,
            error_message: error_message.into(),
            error_type: error_type.into(),
            max_retries: None,
            job_metadata: None,
        }
    }

    pub fn with_original_job_id(mut self, id: impl Into<String>) -> Self {
        self.original_job_id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.job_metadata = Some(metadata);
        self
    }
}

/// Detail of a failed reprocessing attempt. `None` keeps the previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFailure {
    pub error_message: Option<String>,
    pub error_type: Option<String>,
}

impl JobFailure {
    pub fn new(error_message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            error_type: Some(error_type.into()),
        }
    }
}

/// `2^retry_count` minutes between reprocessing attempts, optionally capped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueBackoff {
    /// Ceiling on a single delay; `None` leaves the growth uncapped.
    pub max_delay: Option<TimeDelta>,
}

impl RequeueBackoff {
    pub fn uncapped() -> Self {
        Self { max_delay: None }
    }

    pub fn capped(max_delay: TimeDelta) -> Self {
        Self {
            max_delay: Some(max_delay),
        }
    }

    /// Delay scheduled after the `retry_count`-th failure.
    pub fn delay_for(&self, retry_count: i32) -> TimeDelta {
        let exponent = u32::try_from(retry_count).unwrap_or(0);
        let delay = 2i64
            .checked_pow(exponent)
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX);

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn next_retry_at(&self, now: DateTime<Utc>, retry_count: i32) -> DateTime<Utc> {
        now.checked_add_signed(self.delay_for(retry_count))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Job counts by status, for dashboards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_jobs: u64,
    pub pending_jobs: u64,
    pub processing_jobs: u64,
    pub failed_jobs: u64,
    pub retrying_jobs: u64,
    pub dead_letter_jobs: u64,
    pub resolved_jobs: u64,
}

impl JobStats {
    pub fn from_counts(counts: &HashMap<JobStatus, u64>) -> Self {
        let count = |status| counts.get(&status).copied().unwrap_or(0);
        Self {
            total_jobs: counts.values().sum(),
            pending_jobs: count(JobStatus::Pending),
            processing_jobs: count(JobStatus::Processing),
            failed_jobs: count(JobStatus::Failed),
            retrying_jobs: count(JobStatus::Retrying),
            dead_letter_jobs: count(JobStatus::DeadLetter),
            resolved_jobs: count(JobStatus::Resolved),
        }
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending_jobs,
            JobStatus::Processing => self.processing_jobs,
            JobStatus::Failed => self.failed_jobs,
            JobStatus::Retrying => self.retrying_jobs,
            JobStatus::DeadLetter => self.dead_letter_jobs,
            JobStatus::Resolved => self.resolved_jobs,
        }
    }
}
