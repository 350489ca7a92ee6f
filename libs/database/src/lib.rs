//! PostgreSQL connectivity shared by the dead-letter crates
//!
//! - [`postgres::PostgresConfig`]: pool settings, loadable with `core_config::FromEnv`
//! - [`postgres::connect_with_retry`]: startup connection through a
//!   [`resilience::RetryExecutor`], so an unreachable database is retried with
//!   the same backoff as any other dependency
//! - [`postgres::run_migrations`]: applies a sea-orm-migration `Migrator`
//! - [`postgres::check_health`]: `SELECT 1` probe
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::postgres::{self, PostgresConfig};
//! use resilience::{RetryConfig, RetryExecutor};
//!
//! let config = PostgresConfig::from_env()?;
//! let retry = RetryExecutor::new(RetryConfig::from_env()?);
//! let db = postgres::connect_with_retry(config, &retry).await?;
//! postgres::run_migrations::<migration::Migrator>(&db, "dlq_worker").await?;
//! ```

pub mod error;
pub mod postgres;

pub use error::{DatabaseError, DatabaseResult};
