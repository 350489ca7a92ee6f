use core_config::{ConfigError, FromEnv, env_parse};
use std::time::Duration;

/// Settings for the maintenance loop itself; queue and database settings
/// come from their own crates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Time between maintenance passes
    pub maintenance_interval: Duration,
    /// Run the migrator before the first pass
    pub run_migrations: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(300),
            run_migrations: true,
        }
    }
}

impl WorkerConfig {
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError::invalid(
                "DLQ_WORKER_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Environment variables:
/// - `DLQ_WORKER_INTERVAL_SECS` (default: 300)
/// - `DLQ_WORKER_RUN_MIGRATIONS` (default: true)
impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            maintenance_interval: Duration::from_secs(env_parse("DLQ_WORKER_INTERVAL_SECS", "300")?),
            run_migrations: env_parse("DLQ_WORKER_RUN_MIGRATIONS", "true")?,
        };
        config.validate()?;
        Ok(config)
    }
}
