//! Cache port - キーバリューストア（Redis 相当）
//!
//! 補助的なカウンタや参照に使うだけで、正本ではありません。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::TaskError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    #[default]
    Always,
    /// NX
    IfNotExists,
    /// XX
    IfExists,
}

/// Options for `SET`. `expire` covers both EX (seconds) and PX (milliseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expire: Option<Duration>,
    pub condition: SetCondition,
}

impl SetOptions {
    pub fn ex(secs: u64) -> Self {
        Self {
            expire: Some(Duration::from_secs(secs)),
            ..Self::default()
        }
    }

    pub fn px(millis: u64) -> Self {
        Self {
            expire: Some(Duration::from_millis(millis)),
            ..Self::default()
        }
    }

    pub fn nx(mut self) -> Self {
        self.condition = SetCondition::IfNotExists;
        self
    }

    pub fn xx(mut self) -> Self {
        self.condition = SetCondition::IfExists;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("value at '{0}' is not an integer")]
    NotAnInteger(String),

    #[error("increment or decrement of '{0}' would overflow")]
    Overflow(String),
}

impl From<CacheError> for TaskError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable(_) => TaskError::InfrastructureTransient(err.to_string()),
            CacheError::NotAnInteger(_) | CacheError::Overflow(_) => {
                TaskError::Fatal(err.to_string())
            }
        }
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Returns `false` when an NX/XX condition prevented the write.
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, CacheError>;

    /// A missing key counts as 0 before the increment.
    async fn incr(&self, key: &str, amount: i64) -> Result<i64, CacheError>;

    async fn decr(&self, key: &str, amount: i64) -> Result<i64, CacheError>;
}

/// `competition:{id}:submissions:count`
pub fn competition_count_key(competition_id: impl std::fmt::Display) -> String {
    format!("competition:{competition_id}:submissions:count")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_key_layout() {
        assert_eq!(competition_count_key(42), "competition:42:submissions:count");
    }

    #[test]
    fn cache_errors_map_into_taxonomy() {
        let e: TaskError = CacheError::Unavailable("redis:6379".into()).into();
        assert!(e.is_retryable());
        let e: TaskError = CacheError::NotAnInteger("k".into()).into();
        assert!(!e.is_retryable());
    }
}
