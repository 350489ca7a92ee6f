use crate::models::{DEFAULT_MAX_RETRIES, DeadLetterJob, JobStatus, NewDeadLetterJob};
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sea-ORM Entity for the dead_letter_jobs table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub job_type: String,
    pub original_job_id: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub status: JobStatus,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub next_retry_at: Option<DateTimeWithTimeZone>,
    pub resolved_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "JsonBinary")]
    pub job_metadata: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for DeadLetterJob {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            job_type: model.job_type,
            original_job_id: model.original_job_id,
            payload: model.payload,
            error_message: model.error_message,
            error_type: model.error_type,
            retry_count: model.retry_count,
            max_retries: model.max_retries,
            status: model.status,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
            next_retry_at: model.next_retry_at.map(Into::into),
            resolved_at: model.resolved_at.map(Into::into),
            job_metadata: model.job_metadata,
        }
    }
}

/// Full write-back of a domain job after a lifecycle transition
impl From<DeadLetterJob> for ActiveModel {
    fn from(job: DeadLetterJob) -> Self {
        ActiveModel {
            id: Set(job.id),
            job_type: Set(job.job_type),
            original_job_id: Set(job.original_job_id),
            payload: Set(job.payload),
            error_message: Set(job.error_message),
            error_type: Set(job.error_type),
            retry_count: Set(job.retry_count),
            max_retries: Set(job.max_retries),
            status: Set(job.status),
            created_at: Set(job.created_at.into()),
            updated_at: Set(job.updated_at.into()),
            next_retry_at: Set(job.next_retry_at.map(Into::into)),
            resolved_at: Set(job.resolved_at.map(Into::into)),
            job_metadata: Set(job.job_metadata),
        }
    }
}

impl ActiveModel {
    /// New PENDING row for a freshly failed job
    pub fn from_new(input: NewDeadLetterJob, now: DateTime<Utc>) -> Self {
        ActiveModel {
            id: Set(Uuid::now_v7()),
            job_type: Set(input.job_type),
            original_job_id: Set(input.original_job_id),
            payload: Set(input.payload),
            error_message: Set(Some(input.error_message)),
            error_type: Set(Some(input.error_type)),
            retry_count: Set(0),
            max_retries: Set(input.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)),
            status: Set(JobStatus::Pending),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            next_retry_at: Set(None),
            resolved_at: Set(None),
            job_metadata: Set(input
                .job_metadata
                .unwrap_or_else(|| Json::Object(Default::default()))),
        }
    }
}
