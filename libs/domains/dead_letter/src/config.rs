use chrono::TimeDelta;
use core_config::{ConfigError, FromEnv, env_parse, env_parse_optional};
use std::time::Duration;

use crate::models::{DEFAULT_MAX_RETRIES, RequeueBackoff};

/// Longest accepted retention, about a century
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Dead-letter queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterConfig {
    /// Retry budget for jobs added without one
    pub default_max_retries: i32,
    /// Jobs fetched per scan when the caller gives no limit
    pub batch_limit: u64,
    /// Days a RESOLVED job is kept before the retention sweep deletes it
    pub retention_days: u32,
    /// Ceiling on the requeue backoff; `None` keeps `2^n` minutes uncapped
    pub max_backoff: Option<TimeDelta>,
    /// How often the reprocessor polls for due jobs
    pub poll_interval: Duration,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            default_max_retries: DEFAULT_MAX_RETRIES,
            batch_limit: 100,
            retention_days: 30,
            max_backoff: None,
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl DeadLetterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_max_retries(mut self, max_retries: i32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn with_batch_limit(mut self, limit: u64) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: TimeDelta) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn backoff(&self) -> RequeueBackoff {
        RequeueBackoff {
            max_delay: self.max_backoff,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_retries < 0 {
            return Err(ConfigError::invalid(
                "default_max_retries",
                "must not be negative",
            ));
        }
        if self.batch_limit == 0 {
            return Err(ConfigError::invalid("batch_limit", "must be at least 1"));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::invalid(
                "retention_days",
                format!("must not exceed {MAX_RETENTION_DAYS}"),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be positive"));
        }
        if self.max_backoff.is_some_and(|cap| cap <= TimeDelta::zero()) {
            return Err(ConfigError::invalid("max_backoff", "must be positive"));
        }
        Ok(())
    }
}

/// Environment variables:
/// - `DLQ_DEFAULT_MAX_RETRIES` (default: 3)
/// - `DLQ_BATCH_LIMIT` (default: 100)
/// - `DLQ_RETENTION_DAYS` (default: 30)
/// - `DLQ_MAX_BACKOFF_MINUTES` (optional, uncapped when unset)
/// - `DLQ_POLL_INTERVAL_SECS` (default: 30)
impl FromEnv for DeadLetterConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_backoff = env_parse_optional::<i64>("DLQ_MAX_BACKOFF_MINUTES")?
            .map(|minutes| {
                TimeDelta::try_minutes(minutes).ok_or_else(|| {
                    ConfigError::invalid("DLQ_MAX_BACKOFF_MINUTES", "out of range")
                })
            })
            .transpose()?;
        let poll_interval_secs: u64 = env_parse("DLQ_POLL_INTERVAL_SECS", "30")?;

        let config = Self {
            default_max_retries: env_parse("DLQ_DEFAULT_MAX_RETRIES", "3")?,
            batch_limit: env_parse("DLQ_BATCH_LIMIT", "100")?,
            retention_days: env_parse("DLQ_RETENTION_DAYS", "30")?,
            max_backoff,
            poll_interval: Duration::from_secs(poll_interval_secs),
        };
        config.validate()?;
        Ok(config)
    }
}
