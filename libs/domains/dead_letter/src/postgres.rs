use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, ExprTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    entity,
    error::{DeadLetterError, DeadLetterResult},
    models::{DeadLetterJob, JobFailure, JobStatus, NewDeadLetterJob, RequeueBackoff},
    repository::DeadLetterRepository,
};

pub struct PgDeadLetterRepository {
    db: DatabaseConnection,
}

impl PgDeadLetterRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Load the row under `FOR UPDATE`, let `apply` mutate it, write it back.
    ///
    /// An error from `apply` rolls the transaction back. `None` when no row
    /// has that id.
    async fn transition<F>(&self, id: Uuid, apply: F) -> DeadLetterResult<Option<DeadLetterJob>>
    where
        F: FnOnce(&mut DeadLetterJob) -> DeadLetterResult<()> + Send,
    {
        let txn = self.db.begin().await?;

        let Some(model) = entity::Entity::find_by_id(id)
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        let mut job: DeadLetterJob = model.into();
        apply(&mut job)?;

        let active_model: entity::ActiveModel = job.into();
        let updated = active_model.update(&txn).await?;
        txn.commit().await?;

        Ok(Some(updated.into()))
    }
}

#[async_trait]
impl DeadLetterRepository for PgDeadLetterRepository {
    async fn create(&self, input: NewDeadLetterJob) -> DeadLetterResult<DeadLetterJob> {
        let model = entity::ActiveModel::from_new(input, Utc::now())
            .insert(&self.db)
            .await?;

        tracing::debug!(job_id = %model.id, "Inserted dead letter job");
        Ok(model.into())
    }

    async fn get_by_id(&self, id: Uuid) -> DeadLetterResult<Option<DeadLetterJob>> {
        let model = entity::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Into::into))
    }

    async fn list_retryable(
        &self,
        job_type: Option<String>,
        limit: u64,
        now: DateTime<Utc>,
    ) -> DeadLetterResult<Vec<DeadLetterJob>> {
        let statuses = JobStatus::RETRYABLE
            .into_iter()
            .fold(Condition::any(), |cond, status| {
                cond.add(entity::Column::Status.eq(status))
            });

        let mut query = entity::Entity::find()
            .filter(statuses)
            .filter(Expr::col(entity::Column::RetryCount).lt(Expr::col(entity::Column::MaxRetries)))
            .filter(
                Condition::any()
                    .add(entity::Column::NextRetryAt.is_null())
                    .add(entity::Column::NextRetryAt.lte(now)),
            );

        if let Some(job_type) = job_type {
            query = query.filter(entity::Column::JobType.eq(job_type));
        }

        let models = query
            .order_by_asc(entity::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn list_dead_letter(
        &self,
        job_type: Option<String>,
        limit: u64,
    ) -> DeadLetterResult<Vec<DeadLetterJob>> {
        let mut query =
            entity::Entity::find().filter(entity::Column::Status.eq(JobStatus::DeadLetter));

        if let Some(job_type) = job_type {
            query = query.filter(entity::Column::JobType.eq(job_type));
        }

        let models = query
            .order_by_desc(entity::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> DeadLetterResult<bool> {
        let claimed = self
            .transition(id, |job| {
                if !job.status.is_claimable() {
                    return Err(DeadLetterError::InvalidState {
                        id: job.id,
                        actual: job.status,
                        expected: JobStatus::Pending,
                    });
                }
                job.status = JobStatus::Processing;
                job.updated_at = now;
                Ok(())
            })
            .await;

        match claimed {
            Ok(job) => Ok(job.is_some()),
            Err(DeadLetterError::InvalidState { actual, .. }) => {
                tracing::debug!(job_id = %id, status = %actual, "Job not claimable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn mark_resolved(&self, id: Uuid, now: DateTime<Utc>) -> DeadLetterResult<bool> {
        let resolved = self
            .transition(id, |job| {
                if job.status != JobStatus::Resolved {
                    job.status = JobStatus::Resolved;
                    job.resolved_at = Some(now);
                    job.updated_at = now;
                }
                Ok(())
            })
            .await?;

        Ok(resolved.is_some())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        failure: JobFailure,
        backoff: RequeueBackoff,
        now: DateTime<Utc>,
    ) -> DeadLetterResult<Option<DeadLetterJob>> {
        self.transition(id, |job| {
            job.record_failure(failure, &backoff, now);
            Ok(())
        })
        .await
    }

    async fn release(
        &self,
        id: Uuid,
        status: JobStatus,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DeadLetterResult<bool> {
        let released = self
            .transition(id, |job| {
                if job.status != JobStatus::Processing {
                    return Err(DeadLetterError::InvalidState {
                        id: job.id,
                        actual: job.status,
                        expected: JobStatus::Processing,
                    });
                }
                job.status = status;
                job.next_retry_at = next_retry_at;
                job.updated_at = now;
                Ok(())
            })
            .await;

        match released {
            Ok(job) => Ok(job.is_some()),
            Err(DeadLetterError::InvalidState { actual, .. }) => {
                tracing::debug!(job_id = %id, status = %actual, "Job not held, nothing to release");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn requeue(&self, id: Uuid, now: DateTime<Utc>) -> DeadLetterResult<DeadLetterJob> {
        self.transition(id, |job| {
            if !matches!(job.status, JobStatus::DeadLetter | JobStatus::Processing) {
                return Err(DeadLetterError::InvalidState {
                    id: job.id,
                    actual: job.status,
                    expected: JobStatus::DeadLetter,
                });
            }
            job.requeue(now);
            Ok(())
        })
        .await?
        .ok_or(DeadLetterError::NotFound(id))
    }

    async fn count_by_status(&self) -> DeadLetterResult<HashMap<JobStatus, u64>> {
        let mut counts = HashMap::with_capacity(JobStatus::ALL.len());

        for status in JobStatus::ALL {
            let count = entity::Entity::find()
                .filter(entity::Column::Status.eq(status))
                .count(&self.db)
                .await?;
            counts.insert(status, count);
        }

        Ok(counts)
    }

    async fn delete_resolved_before(&self, cutoff: DateTime<Utc>) -> DeadLetterResult<u64> {
        let result = entity::Entity::delete_many()
            .filter(entity::Column::Status.eq(JobStatus::Resolved))
            .filter(entity::Column::ResolvedAt.lt(cutoff))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
