//! Database port - リレーショナルストアへの接続
//!
//! コネクションは `ConnectionPool` からのみ貸し出されます。
//! DML は文ごとに commit、読み取りクエリは commit 不要という前提です。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::TaskError;

/// Bind parameter / column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.0.get(idx)
    }

    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        match self.0.get(idx) {
            Some(SqlValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Rows touched by a DML statement.
    Affected(u64),
    Rows(Vec<Row>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Syntax, constraint or type errors. Retrying the same statement will fail again.
    #[error("query failed: {0}")]
    Query(String),
}

impl DbError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, DbError::Query(_))
    }

    /// Whether the connection that raised this error must not be reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(self, DbError::Timeout(_) | DbError::ConnectionLost(_))
    }
}

impl From<DbError> for TaskError {
    fn from(err: DbError) -> Self {
        if err.is_transient() {
            TaskError::InfrastructureTransient(err.to_string())
        } else {
            TaskError::Fatal(err.to_string())
        }
    }
}

/// One live database session.
#[async_trait]
pub trait Connection: Send {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;
}

/// Opens new sessions for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;
}

/// Statements that modify data and therefore need a commit.
pub fn is_dml(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    ["INSERT", "UPDATE", "DELETE"]
        .iter()
        .any(|kw| head.starts_with(kw))
}
