//! TaskType - 処理対象タスクの閉じた種別
//!
//! 文字列による動的ディスパッチの代わりに enum を使い、
//! ルーティング表と handler の対応を `match` の網羅性で保証します。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    NormalSubmission,
    PremiumSubmission,
    WinnerTrigger,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::NormalSubmission,
        TaskType::PremiumSubmission,
        TaskType::WinnerTrigger,
    ];

    /// Task name carried in the wire body by producers.
    pub fn task_name(self) -> &'static str {
        match self {
            TaskType::NormalSubmission => "app.tasks.process_normal_submission",
            TaskType::PremiumSubmission => "app.tasks.process_premium_submission",
            TaskType::WinnerTrigger => "app.tasks.trigger_winner_generation",
        }
    }

    pub fn routing_key(self) -> &'static str {
        match self {
            TaskType::NormalSubmission => "normal_submission",
            TaskType::PremiumSubmission => "premium_submission",
            TaskType::WinnerTrigger => "winner_trigger",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::NormalSubmission => "normal_submission",
            TaskType::PremiumSubmission => "premium_submission",
            TaskType::WinnerTrigger => "winner_trigger",
        }
    }

    pub fn is_submission(self) -> bool {
        matches!(
            self,
            TaskType::NormalSubmission | TaskType::PremiumSubmission
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskError;

    /// Accepts both the wire task name and the short snake_case name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.task_name() == s || t.as_str() == s)
            .ok_or_else(|| TaskError::UnknownTaskType(s.to_string()))
    }
}
