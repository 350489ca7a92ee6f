//! Dead Letter Domain
//!
//! Durable storage for failed units of work, with retry scheduling and
//! lifecycle transitions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ DeadLetterReprocessor│  ← Scheduled retry loop (claim, run, resolve/fail)
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │   DeadLetterQueue    │  ← Lifecycle operations, validation, logging
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │ DeadLetterRepository │  ← Data access (trait + Postgres implementation)
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │       Models         │  ← Job, status, backoff, stats
//! └──────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! PENDING ──claim──> PROCESSING ──ok──> RESOLVED ──retention sweep──> deleted
//!    ^                   │
//!    │                   └──fail──> RETRYING (next_retry_at = now + 2^n min)
//!    │                                 │
//!    │                                 └──budget spent──> DEAD_LETTER
//!    └────────────── operator requeue ─────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_dead_letter::{DeadLetterConfig, DeadLetterQueue, NewDeadLetterJob, PgDeadLetterRepository};
//! use sea_orm::Database;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("postgres://...").await?;
//! let queue = DeadLetterQueue::new(PgDeadLetterRepository::new(db), DeadLetterConfig::default());
//!
//! let job_id = queue
//!     .add_failed_job(NewDeadLetterJob::new(
//!         "embed_chunks",
//!         json!({ "document_id": "doc-42" }),
//!         "embedding service timed out",
//!         "timeout",
//!     ))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod reprocessor;
pub mod service;

// Re-export commonly used types
pub use config::{DeadLetterConfig, MAX_RETENTION_DAYS};
pub use error::{DeadLetterError, DeadLetterResult};
pub use models::{
    DeadLetterJob, JobFailure, JobStats, JobStatus, NewDeadLetterJob, RequeueBackoff,
    DEFAULT_MAX_RETRIES,
};
pub use postgres::PgDeadLetterRepository;
pub use repository::DeadLetterRepository;
pub use reprocessor::{DeadLetterReprocessor, JobError, JobHandler, ReprocessSummary};
pub use service::DeadLetterQueue;
