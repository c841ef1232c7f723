//! Handler trait - Task を実行する Handler の定義
//!
//! # ジェネリクスによる型安全性
//! - `Handler<Submission>` は `Submission` しか受け取れない
//! - TaskType ごとの handler の対応は `Handlers` のフィールドで固定され、
//!   executor の `match` が網羅性を保証する

use std::sync::Arc;

use async_trait::async_trait;

use super::task::{Submission, Task, WinnerTrigger};
use crate::app::context::TaskContext;
use crate::domain::TaskError;

/// Handler は Task を実行して成功メッセージを返す
///
/// # 使用例
/// ```ignore
/// struct AuditHandler;
///
/// #[async_trait]
/// impl Handler<WinnerTrigger> for AuditHandler {
///     async fn handle(&self, ctx: &TaskContext<'_>, task: WinnerTrigger) -> Result<String, TaskError> {
///         Ok(format!("competition {} audited", task.competition_id))
///     }
/// }
/// ```
///
/// Errors are classified by `TaskError::kind()`; return a retryable variant
/// only for failures a later attempt can fix.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: &TaskContext<'_>, task: T) -> Result<String, TaskError>;
}

/// One handler per payload type.
#[derive(Clone)]
pub struct Handlers {
    pub submission: Arc<dyn Handler<Submission>>,
    pub winner_trigger: Arc<dyn Handler<WinnerTrigger>>,
}

impl Handlers {
    pub fn new(
        submission: impl Handler<Submission> + 'static,
        winner_trigger: impl Handler<WinnerTrigger> + 'static,
    ) -> Self {
        Self {
            submission: Arc::new(submission),
            winner_trigger: Arc::new(winner_trigger),
        }
    }
}
