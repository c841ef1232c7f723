//! RetryEngine - タスクごとの試行回数と再試行判断
//!
//! # 不変条件
//! - 状態は 1 つのロックの下でだけ変更する
//! - 同じ TaskId が同時に 2 つ実行されることはない（`in_flight`）
//! - 状態は決定（Ack / Requeue / GiveUp）のたびに破棄される。再試行回数はメッセージが運ぶ
//! - 上限に達した試行番号では実行を許可しない

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use super::policy::{Backoff, RetryPolicies};
use crate::domain::{Decision, Outcome, TaskEnvelope, TaskError, TaskId, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryState {
    pub task_type: TaskType,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub in_flight: bool,
}

/// Permission to run one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTicket {
    pub task_id: TaskId,
    /// 1-based.
    pub attempt_number: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Execute(AttemptTicket),
    /// Another delivery of the same task is executing in this process.
    AlreadyInFlight,
    /// The delivery already used up every attempt; it must not run again.
    Exhausted { attempts_made: u32 },
}

pub struct RetryEngine {
    policies: RetryPolicies,
    states: Mutex<HashMap<TaskId, RetryState>>,
}

impl RetryEngine {
    pub fn new(policies: RetryPolicies) -> Self {
        Self {
            policies,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<TaskId, RetryState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn policies(&self) -> &RetryPolicies {
        &self.policies
    }

    /// Start an attempt for `envelope`.
    ///
    /// `carried_retries` is the retry count found on the delivery; the count
    /// continues from whichever is higher, local state or the message.
    pub fn begin(&self, envelope: &TaskEnvelope, carried_retries: u32) -> Admission {
        let task_type = envelope.task_type();
        let policy = self.policies.for_type(task_type);

        let mut states = self.states();
        let state = states
            .entry(envelope.task_id())
            .or_insert_with(|| RetryState {
                task_type,
                attempts_made: 0,
                max_attempts: policy.max_attempts,
                backoff: policy.backoff,
                in_flight: false,
            });

        if state.in_flight {
            return Admission::AlreadyInFlight;
        }
        let attempts_made = state.attempts_made.max(carried_retries);
        if attempts_made >= state.max_attempts {
            states.remove(&envelope.task_id());
            return Admission::Exhausted { attempts_made };
        }
        state.attempts_made = attempts_made + 1;
        state.in_flight = true;

        Admission::Execute(AttemptTicket {
            task_id: envelope.task_id(),
            attempt_number: state.attempts_made,
            max_attempts: state.max_attempts,
        })
    }

    /// Turn an attempt outcome into what the worker must do next.
    pub fn decide(&self, task_id: TaskId, outcome: &Outcome) -> Decision {
        let mut states = self.states();
        let Some(state) = states.get_mut(&task_id) else {
            return Decision::GiveUp {
                attempts_made: 0,
                error: TaskError::Fatal(format!("no attempt in progress for {task_id}")),
            };
        };
        state.in_flight = false;
        let attempts_made = state.attempts_made;

        let decision = match outcome {
            Outcome::Success(_) => Decision::Ack { attempts_made },
            Outcome::Retryable(err) if attempts_made < state.max_attempts => {
                let delay = state.backoff.next_delay(attempts_made);
                debug!(%task_id, attempts_made, max_attempts = state.max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "retry scheduled");
                Decision::Requeue {
                    delay,
                    attempts_made,
                }
            }
            Outcome::Retryable(err) => Decision::GiveUp {
                attempts_made,
                error: TaskError::RetriesExhausted {
                    attempts: attempts_made,
                    last_error: err.to_string(),
                },
            },
            Outcome::Fatal(err) => Decision::GiveUp {
                attempts_made,
                error: err.clone(),
            },
        };

        states.remove(&task_id);
        decision
    }

    /// Put back the count of a requeue that could not be published, so the
    /// rejected delivery continues from it when it comes back here.
    pub fn restore(&self, envelope: &TaskEnvelope, attempts_made: u32) {
        let policy = self.policies.for_type(envelope.task_type());
        self.states().insert(
            envelope.task_id(),
            RetryState {
                task_type: envelope.task_type(),
                attempts_made,
                max_attempts: policy.max_attempts,
                backoff: policy.backoff,
                in_flight: false,
            },
        );
    }

    /// Drop the state of `task_id`.
    pub fn complete(&self, task_id: TaskId) {
        self.states().remove(&task_id);
    }

    /// Give up the in-flight mark without deciding, keeping the count.
    pub fn abandon(&self, task_id: TaskId) {
        if let Some(state) = self.states().get_mut(&task_id) {
            state.in_flight = false;
        }
    }

    pub fn state(&self, task_id: TaskId) -> Option<RetryState> {
        self.states().get(&task_id).copied()
    }

    pub fn tracked(&self) -> usize {
        self.states().len()
    }
}
