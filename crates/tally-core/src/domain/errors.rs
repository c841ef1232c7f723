//! Errors - タスク実行エラーの分類
//!
//! 下位レイヤー（pool / db / cache / broker）のエラーは利用箇所で
//! `TaskError` に変換され、`kind()` によって Retry Policy Engine が
//! 再配送するかどうかを判断します。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operational classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Transient infrastructure failure; redelivery may succeed.
    Retryable,
    /// Redelivery cannot fix it (bad input, programming error, exhausted budget).
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("transient infrastructure failure: {0}")]
    InfrastructureTransient(String),

    #[error("connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    #[error("unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("unroutable task: {0}")]
    UnroutableTask(String),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("priority {0} is outside 0..={max}", max = super::envelope::MAX_PRIORITY)]
    InvalidPriority(u8),

    /// Programming or data error raised by task logic.
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::InfrastructureTransient(_) | TaskError::PoolExhausted(_) => {
                ErrorKind::Retryable
            }
            TaskError::MalformedPayload(_)
            | TaskError::UnknownTaskType(_)
            | TaskError::UnroutableTask(_)
            | TaskError::RetriesExhausted { .. }
            | TaskError::InvalidPriority(_)
            | TaskError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskError::InfrastructureTransient("connection refused".into()), ErrorKind::Retryable)]
    #[case(TaskError::PoolExhausted(Duration::from_secs(5)), ErrorKind::Retryable)]
    #[case(TaskError::MalformedPayload("missing competitionId".into()), ErrorKind::Fatal)]
    #[case(TaskError::UnroutableTask("x".into()), ErrorKind::Fatal)]
    #[case(TaskError::RetriesExhausted { attempts: 3, last_error: "timeout".into() }, ErrorKind::Fatal)]
    #[case(TaskError::Fatal("division by zero".into()), ErrorKind::Fatal)]
    fn classifies_errors(#[case] err: TaskError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn invalid_priority_message_names_the_bound() {
        assert_eq!(
            TaskError::InvalidPriority(11).to_string(),
            "priority 11 is outside 0..=10"
        );
    }
}
