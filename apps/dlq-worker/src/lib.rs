//! Dead Letter Queue Worker
//!
//! Keeps the dead-letter store tidy and observable.
//!
//! ## Architecture
//!
//! ```text
//! every DLQ_WORKER_INTERVAL_SECS
//!   ↓
//! Resilient("postgres")  (breaker around retry)
//!   ↓                          ↓
//! cleanup_resolved_jobs    get_job_stats
//!   ↓                          ↓
//! PostgreSQL               dlq_jobs{status} gauges
//! ```
//!
//! Reprocessing itself belongs to the services that own each job type;
//! they run a `DeadLetterReprocessor` with their own `JobHandler`.

pub mod config;
pub mod maintenance;

pub use config::WorkerConfig;
pub use maintenance::{Maintenance, MaintenanceReport};

use core_config::{Environment, FromEnv, app_info};
use database::postgres::{self, PostgresConfig};
use domain_dead_letter::{DeadLetterConfig, DeadLetterQueue, PgDeadLetterRepository};
use eyre::{Result, WrapErr};
use resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, Resilient, RetryConfig, RetryExecutor,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Run the worker until SIGINT or SIGTERM.
///
/// 1. Tracing and the Prometheus recorder
/// 2. Configuration from the environment
/// 3. PostgreSQL connection (retried) and migrations
/// 4. The maintenance loop
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    resilience::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, ?environment, "Starting dead letter queue worker");

    let worker_config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    let dlq_config =
        DeadLetterConfig::from_env().wrap_err("Failed to load dead letter queue configuration")?;
    let retry_config = RetryConfig::from_env().wrap_err("Failed to load retry configuration")?;
    let breaker_config =
        CircuitBreakerConfig::from_env().wrap_err("Failed to load circuit breaker configuration")?;
    let pg_config =
        PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;

    info!("Connecting to PostgreSQL...");
    let db = postgres::connect_with_retry(pg_config, &RetryExecutor::new(retry_config.clone()))
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;

    if worker_config.run_migrations {
        postgres::run_migrations::<migration::Migrator>(&db, app_info.name)
            .await
            .wrap_err("Failed to run migrations")?;
    }

    let health = postgres::check_health_detailed(&db).await;
    info!(healthy = health.healthy, response_time_ms = health.response_time_ms, "PostgreSQL ready");

    let registry = CircuitBreakerRegistry::new();
    let resilient = Resilient::from_registry(&registry, "postgres", breaker_config, retry_config);

    let queue = DeadLetterQueue::new(PgDeadLetterRepository::new(db), dlq_config);
    let maintenance = Maintenance::new(queue, resilient);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    maintenance
        .run(worker_config.maintenance_interval, shutdown_rx)
        .await;

    for snapshot in registry.list_metrics() {
        info!(
            breaker = %snapshot.name,
            state = %snapshot.state,
            failure_count = snapshot.failure_count,
            "Circuit breaker state at shutdown"
        );
    }

    info!("Dead letter queue worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
