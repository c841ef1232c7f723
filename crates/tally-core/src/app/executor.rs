//! TaskExecutor - 1 回の試行を実行して DeliveryAttempt を返す
//!
//! # フロー
//! 1. PayloadCodec で payload を decode（失敗は MalformedPayload、fatal）
//! 2. TaskType の `match` で型付き handler に振り分け
//! 3. 結果を Outcome に分類し、試行ごとに構造化ログを 1 件出す

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};

use super::context::{TaskContext, WorkerContext};
use crate::domain::{DeliveryAttempt, Outcome, OutcomeKind, TaskEnvelope, TaskError, TaskType};
use crate::typed::{Handlers, PayloadCodec, Submission, WinnerTrigger};

pub struct TaskExecutor {
    context: Arc<WorkerContext>,
    handlers: Handlers,
}

impl TaskExecutor {
    pub fn new(context: Arc<WorkerContext>, handlers: Handlers) -> Self {
        Self { context, handlers }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub async fn execute(
        &self,
        worker_id: usize,
        envelope: &TaskEnvelope,
        attempt_number: u32,
    ) -> DeliveryAttempt {
        let started_at = self.context.clock().now();
        let attempt_id = self.context.ids().generate_attempt_id();
        let start = Instant::now();

        let ctx = TaskContext {
            worker: &self.context,
            worker_id,
            task_id: envelope.task_id(),
            task_type: envelope.task_type(),
            attempt_number,
        };
        let outcome = Outcome::from_result(self.dispatch(&ctx, envelope).await);
        let elapsed = start.elapsed();

        let attempt = DeliveryAttempt {
            attempt_id,
            task_id: envelope.task_id(),
            task_type: envelope.task_type(),
            attempt_number,
            started_at,
            elapsed,
            outcome,
        };
        log_attempt(worker_id, &attempt);
        attempt
    }

    async fn dispatch(&self, ctx: &TaskContext<'_>, envelope: &TaskEnvelope) -> Result<String, TaskError> {
        let task_type = envelope.task_type();
        match task_type {
            TaskType::NormalSubmission | TaskType::PremiumSubmission => {
                let task: Submission = PayloadCodec::decode(task_type, envelope.payload())?;
                self.handlers.submission.handle(ctx, task).await
            }
            TaskType::WinnerTrigger => {
                let task: WinnerTrigger = PayloadCodec::decode(task_type, envelope.payload())?;
                self.handlers.winner_trigger.handle(ctx, task).await
            }
        }
    }
}

fn log_attempt(worker_id: usize, attempt: &DeliveryAttempt) {
    let elapsed_ms = attempt.elapsed.as_millis() as u64;
    match &attempt.outcome {
        Outcome::Success(message) => info!(
            worker = worker_id,
            task_id = %attempt.task_id,
            task_type = %attempt.task_type,
            attempt = attempt.attempt_number,
            elapsed_ms,
            outcome = ?OutcomeKind::Success,
            message = %message,
            "task attempt finished"
        ),
        Outcome::Retryable(err) | Outcome::Fatal(err) => warn!(
            worker = worker_id,
            task_id = %attempt.task_id,
            task_type = %attempt.task_type,
            attempt = attempt.attempt_number,
            elapsed_ms,
            outcome = ?attempt.outcome.kind(),
            error = %err,
            "task attempt failed"
        ),
    }
}
