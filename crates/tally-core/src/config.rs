//! Worker configuration.
//!
//! Every field has a default, so an empty document is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{MAX_PRIORITY, TaskType};
use crate::pool::PoolConfig;
use crate::retry::RetryPolicies;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            min_connections: defaults.min_connections,
            max_connections: defaults.max_connections,
            acquire_timeout_ms: defaults.acquire_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker slots, i.e. tasks executing at the same time.
    pub concurrency: usize,
    /// `x-max-priority` declared on the submission queues.
    pub max_priority: u8,
    pub pool: PoolSettings,
    pub retry: RetryPolicies,
    /// Duration of the stand-in work each task performs.
    pub simulated_work_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_priority: MAX_PRIORITY,
            pool: PoolSettings::default(),
            retry: RetryPolicies::default(),
            simulated_work_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("pool bounds are invalid: min {min}, max {max}")]
    PoolBounds { min: u32, max: u32 },

    #[error("max_priority {0} exceeds {max}", max = MAX_PRIORITY)]
    PriorityTooHigh(u8),

    #[error("retry policy for {0} allows no attempts")]
    NoAttempts(TaskType),
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        let (min, max) = (self.pool.min_connections, self.pool.max_connections);
        if max == 0 || min > max {
            return Err(ConfigError::PoolBounds { min, max });
        }
        if self.max_priority > MAX_PRIORITY {
            return Err(ConfigError::PriorityTooHigh(self.max_priority));
        }
        if let Some(task_type) = TaskType::ALL
            .into_iter()
            .find(|t| self.retry.for_type(*t).max_attempts == 0)
        {
            return Err(ConfigError::NoAttempts(task_type));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_connections: self.pool.min_connections,
            max_connections: self.pool.max_connections,
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
        }
    }

    pub fn simulated_work(&self) -> Duration {
        Duration::from_millis(self.simulated_work_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    #[test]
    fn empty_document_yields_defaults() {
        let config: WorkerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_config(), PoolConfig::default());
    }

    #[test]
    fn partial_pool_section_keeps_other_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"concurrency": 8, "pool": {"max_connections": 20}}"#).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.pool.max_connections, 20);
        assert_eq!(config.pool.min_connections, 1);
        assert_eq!(config.pool_config().acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_invalid_settings() {
        let config = WorkerConfig {
            concurrency: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroConcurrency));

        let mut config = WorkerConfig::default();
        config.pool.min_connections = 11;
        assert_eq!(
            config.validate(),
            Err(ConfigError::PoolBounds { min: 11, max: 10 })
        );

        let mut config = WorkerConfig::default();
        config
            .retry
            .set(TaskType::WinnerTrigger, RetryPolicy::fixed(0, Duration::ZERO));
        assert_eq!(
            config.validate(),
            Err(ConfigError::NoAttempts(TaskType::WinnerTrigger))
        );

        let config = WorkerConfig {
            max_priority: 11,
            ..WorkerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::PriorityTooHigh(11)));
    }
}
