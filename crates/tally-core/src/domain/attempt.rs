//! Delivery attempt: one execution of a task.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::ids::{AttemptId, TaskId};
use super::outcome::Outcome;
use super::task_type::TaskType;

/// A single execution attempt of a task.
///
/// Created when the executor starts, dropped once the worker has acted on the
/// outcome. Only the attempt count survives across attempts (in the retry
/// engine and on the requeued message).
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryAttempt {
    pub attempt_id: AttemptId,
    pub task_id: TaskId,
    pub task_type: TaskType,

    /// 1-based.
    pub attempt_number: u32,

    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl DeliveryAttempt {
    pub fn error_detail(&self) -> Option<String> {
        self.outcome.error().map(|e| e.to_string())
    }
}
