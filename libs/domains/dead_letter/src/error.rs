use resilience::{Categorized, ErrorCategory};
use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Dead letter job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Job {id} is {actual}, expected {expected}")]
    InvalidState {
        id: Uuid,
        actual: JobStatus,
        expected: JobStatus,
    },

    #[error("Database error: {0}")]
    Database(String),
}

pub type DeadLetterResult<T> = Result<T, DeadLetterError>;

/// Store failures are worth retrying; everything else is a caller mistake.
impl Categorized for DeadLetterError {
    fn category(&self) -> ErrorCategory {
        match self {
            DeadLetterError::Database(_) => ErrorCategory::Unavailable,
            DeadLetterError::NotFound(_)
            | DeadLetterError::Validation(_)
            | DeadLetterError::InvalidState { .. } => ErrorCategory::Permanent,
        }
    }
}

impl From<sea_orm::DbErr> for DeadLetterError {
    fn from(err: sea_orm::DbErr) -> Self {
        DeadLetterError::Database(err.to_string())
    }
}

impl From<validator::ValidationErrors> for DeadLetterError {
    fn from(err: validator::ValidationErrors) -> Self {
        DeadLetterError::Validation(err.to_string())
    }
}
