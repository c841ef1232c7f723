//! ResultStore port - 結果バックエンド
//!
//! 恒久的に失敗したタスクは必ずここに記録されます（黙って捨てない）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{TaskId, TaskType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResult {
    Succeeded { message: String, attempts: u32 },
    Failed { error: String, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub result: TaskResult,
    pub recorded_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.result, TaskResult::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultStoreError {
    #[error("result backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn record(&self, record: ResultRecord) -> Result<(), ResultStoreError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<ResultRecord>, ResultStoreError>;
}
