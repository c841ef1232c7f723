//! TaskEnvelope - キューを流れるタスクの不変データ

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::ids::TaskId;
use super::task_type::TaskType;

/// Max-priority ceiling declared on the priority-capable queues.
pub const MAX_PRIORITY: u8 = 10;

/// Message priority in `0..=MAX_PRIORITY`. Higher is dequeued first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const HIGHEST: Priority = Priority(MAX_PRIORITY);

    pub fn new(value: u8) -> Result<Self, TaskError> {
        if value > MAX_PRIORITY {
            return Err(TaskError::InvalidPriority(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Priority for a submission given the time left before its competition closes.
    ///
    /// Late submissions jump ahead of early ones; anything two minutes or more
    /// away keeps the lowest priority.
    pub fn for_deadline(remaining: ChronoDuration) -> Self {
        let secs = remaining.num_seconds();
        let value = match secs {
            s if s <= 10 => 5,
            s if s <= 20 => 4,
            s if s <= 30 => 3,
            s if s <= 60 => 2,
            s if s <= 120 => 1,
            _ => 0,
        };
        Self(value)
    }
}

impl TryFrom<u8> for Priority {
    type Error = TaskError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

/// Immutable unit of work as produced and delivered.
///
/// `payload` stays opaque JSON bytes until the executor decodes it.
/// `delivery_not_before` is only stamped by the delayed dispatch gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_id: TaskId,
    task_type: TaskType,
    payload: Vec<u8>,
    routing_key: String,
    priority: Priority,
    enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivery_not_before: Option<DateTime<Utc>>,
}

impl TaskEnvelope {
    pub fn new(
        task_id: TaskId,
        task_type: TaskType,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        priority: Priority,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            task_type,
            payload,
            routing_key: routing_key.into(),
            priority,
            enqueued_at,
            delivery_not_before: None,
        }
    }

    pub(crate) fn with_delivery_not_before(mut self, at: DateTime<Utc>) -> Self {
        self.delivery_not_before = Some(at);
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn delivery_not_before(&self) -> Option<DateTime<Utc>> {
        self.delivery_not_before
    }
}
