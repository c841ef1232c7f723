//! Stand-in task handlers.
//!
//! The real business rules live elsewhere; these do a fixed amount of
//! simulated work plus the same side effects as production.

use async_trait::async_trait;
use tracing::{error, info};

use super::context::TaskContext;
use crate::domain::{TaskError, TaskType};
use crate::ports::cache::competition_count_key;
use crate::ports::{CacheError, QueryResult, SqlValue};
use crate::typed::{CompetitionId, Handler, Submission, WinnerTrigger};

const INSERT_SUBMISSION: &str = "INSERT INTO submission (competition_id, email, submission_data, created_at) VALUES ($1, $2, $3, $4)";
const COUNT_SUBMISSIONS: &str = "SELECT COUNT(*) FROM submission WHERE competition_id = $1";

fn competition_param(id: &CompetitionId) -> SqlValue {
    match id {
        CompetitionId::Int(id) => SqlValue::Int(*id),
        CompetitionId::Text(id) => SqlValue::Text(id.clone()),
    }
}

fn cache_failure(key: &str, err: CacheError) -> TaskError {
    error!(key, error = %err, "cache operation failed");
    err.into()
}

/// Stores the submission, then bumps the per-competition counter.
pub struct SubmissionHandler;

#[async_trait]
impl Handler<Submission> for SubmissionHandler {
    async fn handle(&self, ctx: &TaskContext<'_>, task: Submission) -> Result<String, TaskError> {
        let tier = match ctx.task_type {
            TaskType::PremiumSubmission => "premium",
            _ => "normal",
        };
        ctx.worker.simulate_work().await;

        let email = task
            .email
            .as_ref()
            .map_or(SqlValue::Null, |e| SqlValue::Text(e.clone()));
        let params = [
            competition_param(&task.competition_id),
            email,
            SqlValue::Json(task.form_data.clone()),
            SqlValue::Timestamp(ctx.worker.clock().now()),
        ];
        ctx.worker.run_query(INSERT_SUBMISSION, &params).await?;

        let key = competition_count_key(&task.competition_id);
        let count = ctx
            .worker
            .cache()
            .incr(&key, 1)
            .await
            .map_err(|e| cache_failure(&key, e))?;

        Ok(format!(
            "{tier} submission for competition {} stored ({count} so far)",
            task.competition_id
        ))
    }
}

/// Reads the cached and stored submission counts for a closed competition.
pub struct WinnerTriggerHandler;

#[async_trait]
impl Handler<WinnerTrigger> for WinnerTriggerHandler {
    async fn handle(&self, ctx: &TaskContext<'_>, task: WinnerTrigger) -> Result<String, TaskError> {
        ctx.worker.simulate_work().await;

        let key = competition_count_key(&task.competition_id);
        let cached = ctx
            .worker
            .cache()
            .get(&key)
            .await
            .map_err(|e| cache_failure(&key, e))?;
        if cached.is_none() {
            info!(key, competition_id = %task.competition_id, "no cached submission count");
        }

        let result = ctx
            .worker
            .run_query(COUNT_SUBMISSIONS, &[competition_param(&task.competition_id)])
            .await?;
        let stored = match result {
            QueryResult::Rows(rows) => rows.first().and_then(|row| row.get_i64(0)),
            QueryResult::Affected(_) => None,
        };

        Ok(format!(
            "winner generation triggered for competition {}: cached count {}, stored count {}",
            task.competition_id,
            cached.as_deref().unwrap_or("absent"),
            stored.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
        ))
    }
}
