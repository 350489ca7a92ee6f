use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

fn statuses() -> [JobStatus; 6] {
    [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Failed,
        JobStatus::Retrying,
        JobStatus::DeadLetter,
        JobStatus::Resolved,
    ]
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(JobStatus::Enum)
                    .values(statuses())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeadLetterJobs::Table)
                    .if_not_exists()
                    .col(pk_uuid(DeadLetterJobs::Id))
                    .col(string(DeadLetterJobs::JobType))
                    .col(string_null(DeadLetterJobs::OriginalJobId))
                    .col(json_binary(DeadLetterJobs::Payload))
                    .col(text_null(DeadLetterJobs::ErrorMessage))
                    .col(string_null(DeadLetterJobs::ErrorType))
                    .col(integer(DeadLetterJobs::RetryCount).default(0))
                    .col(integer(DeadLetterJobs::MaxRetries).default(3))
                    .col(
                        ColumnDef::new(DeadLetterJobs::Status)
                            .enumeration(JobStatus::Enum, statuses())
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        timestamp_with_time_zone(DeadLetterJobs::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(DeadLetterJobs::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(DeadLetterJobs::NextRetryAt))
                    .col(timestamp_with_time_zone_null(DeadLetterJobs::ResolvedAt))
                    .col(
                        json_binary(DeadLetterJobs::JobMetadata)
                            .default(Expr::cust("'{}'::jsonb")),
                    )
                    .to_owned(),
            )
            .await?;

        // Retry scan: status filter plus next_retry_at range
        manager
            .create_index(
                Index::create()
                    .name("idx_dead_letter_jobs_status_next_retry_at")
                    .table(DeadLetterJobs::Table)
                    .col(DeadLetterJobs::Status)
                    .col(DeadLetterJobs::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dead_letter_jobs_job_type")
                    .table(DeadLetterJobs::Table)
                    .col(DeadLetterJobs::JobType)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dead_letter_jobs_created_at")
                    .table(DeadLetterJobs::Table)
                    .col(DeadLetterJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Retention sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_dead_letter_jobs_resolved_at")
                    .table(DeadLetterJobs::Table)
                    .col(DeadLetterJobs::ResolvedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TRIGGER dead_letter_jobs_touch_updated_at
                    BEFORE UPDATE ON dead_letter_jobs
                    FOR EACH ROW
                    EXECUTE FUNCTION util.touch_updated_at()
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                "DROP TRIGGER IF EXISTS dead_letter_jobs_touch_updated_at ON dead_letter_jobs",
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DeadLetterJobs::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(JobStatus::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum DeadLetterJobs {
    Table,
    Id,
    JobType,
    OriginalJobId,
    Payload,
    ErrorMessage,
    ErrorType,
    RetryCount,
    MaxRetries,
    Status,
    CreatedAt,
    UpdatedAt,
    NextRetryAt,
    ResolvedAt,
    JobMetadata,
}

#[derive(DeriveIden)]
enum JobStatus {
    #[sea_orm(iden = "dead_letter_job_status")]
    Enum,
    #[sea_orm(iden = "pending")]
    Pending,
    #[sea_orm(iden = "processing")]
    Processing,
    #[sea_orm(iden = "failed")]
    Failed,
    #[sea_orm(iden = "retrying")]
    Retrying,
    #[sea_orm(iden = "dead_letter")]
    DeadLetter,
    #[sea_orm(iden = "resolved")]
    Resolved,
}
