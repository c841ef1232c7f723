//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPES`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::TaskType;

/// Task は payload 型と TaskType を対応付ける
///
/// 1 つの payload 型が複数の TaskType を担うことがあります
/// （通常 / プレミアムの投稿はどちらも `Submission`）。
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPES: &'static [TaskType];
}

/// Competition identifier as producers send it: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompetitionId {
    Int(i64),
    Text(String),
}

impl fmt::Display for CompetitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompetitionId::Int(id) => write!(f, "{id}"),
            CompetitionId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for CompetitionId {
    fn from(id: i64) -> Self {
        CompetitionId::Int(id)
    }
}

/// A contest entry sent by the web front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub competition_id: CompetitionId,
    #[serde(default)]
    pub form_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl Task for Submission {
    const TYPES: &'static [TaskType] = &[TaskType::NormalSubmission, TaskType::PremiumSubmission];
}

/// Asks the worker to pick winners once a competition has closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerTrigger {
    pub competition_id: CompetitionId,
}

impl Task for WinnerTrigger {
    const TYPES: &'static [TaskType] = &[TaskType::WinnerTrigger];
}
