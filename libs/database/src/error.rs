use resilience::{Categorized, ErrorCategory};
use sea_orm::DbErr;

/// Errors raised while connecting to, migrating or probing PostgreSQL
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] DbErr),

    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Connection-level failures are worth retrying; anything the server
/// actually answered with is not.
impl Categorized for DatabaseError {
    fn category(&self) -> ErrorCategory {
        match self {
            DatabaseError::Postgres(DbErr::Conn(_) | DbErr::ConnectionAcquire(_)) => {
                ErrorCategory::Unavailable
            }
            DatabaseError::HealthCheckFailed(_) => ErrorCategory::Unavailable,
            DatabaseError::Postgres(_) | DatabaseError::MigrationError(_) => {
                ErrorCategory::Permanent
            }
        }
    }
}
