//! PayloadCodec - payload bytes と Task の相互変換
//!
//! ワイヤ上の body は Celery プロトコル風の JSON です:
//! `{"id": "...", "task": "app.tasks.process_normal_submission", "args": ["<payload JSON>"], "kwargs": {}}`

use serde::{Deserialize, Serialize};

use super::task::Task;
use crate::domain::{TaskError, TaskType};

pub struct PayloadCodec;

impl PayloadCodec {
    /// Decode `bytes` as `T`, checking that `T` serves `task_type`.
    pub fn decode<T: Task>(task_type: TaskType, bytes: &[u8]) -> Result<T, TaskError> {
        if !T::TYPES.contains(&task_type) {
            return Err(TaskError::Fatal(format!(
                "payload type {} does not handle {task_type}",
                std::any::type_name::<T>()
            )));
        }
        serde_json::from_slice(bytes).map_err(|e| TaskError::MalformedPayload(e.to_string()))
    }

    pub fn encode<T: Task>(task: &T) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(task).map_err(|e| TaskError::Fatal(format!("json encode: {e}")))
    }
}

/// Message body as written by the producing web application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBody {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl WireBody {
    pub fn new(id: impl Into<String>, task_type: TaskType, payload: &[u8]) -> Result<Self, TaskError> {
        let payload = std::str::from_utf8(payload)
            .map_err(|e| TaskError::MalformedPayload(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            task: task_type.task_name().to_string(),
            args: vec![serde_json::Value::String(payload.to_string())],
            kwargs: serde_json::Map::new(),
        })
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, TaskError> {
        serde_json::from_slice(body).map_err(|e| TaskError::MalformedPayload(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(self).map_err(|e| TaskError::Fatal(format!("json encode: {e}")))
    }

    pub fn task_type(&self) -> Result<TaskType, TaskError> {
        self.task.parse()
    }

    /// Payload bytes from `args[0]`.
    ///
    /// Producers JSON-encode the payload into a string; an inline object is
    /// accepted too.
    pub fn payload(&self) -> Result<Vec<u8>, TaskError> {
        match self.args.first() {
            Some(serde_json::Value::String(json)) => {
                serde_json::from_str::<serde_json::Value>(json)
                    .map_err(|e| TaskError::MalformedPayload(e.to_string()))?;
                Ok(json.as_bytes().to_vec())
            }
            Some(value @ serde_json::Value::Object(_)) => serde_json::to_vec(value)
                .map_err(|e| TaskError::MalformedPayload(e.to_string())),
            Some(other) => Err(TaskError::MalformedPayload(format!(
                "args[0] must be a JSON string or object, got {other}"
            ))),
            None => Err(TaskError::MalformedPayload("args is empty".to_string())),
        }
    }
}
