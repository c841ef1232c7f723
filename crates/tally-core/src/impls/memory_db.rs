//! InMemoryDatabase - 開発・テスト用のリレーショナルストア
//!
//! SQL は解釈しません。文とパラメータを記録し、SELECT にはスタブ行を返します。
//! 障害注入（接続拒否・実行失敗）で pool / retry の挙動を検証できます。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::ports::database::is_dml;
use crate::ports::{Connection, ConnectionFactory, DbError, QueryResult, Row, SqlValue};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub session: u64,
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Default)]
struct DbState {
    committed: Vec<ExecutedStatement>,
    reads: Vec<ExecutedStatement>,
    rollbacks: u64,
    connect_faults: VecDeque<DbError>,
    execute_faults: VecDeque<DbError>,
    stubs: Vec<(String, Vec<Row>)>,
    opened: u64,
    live: usize,
    peak_live: usize,
}

/// Shared handle; clones observe the same state.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<DbState>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DbState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `connect()` fails with `err`. Calls queue up.
    pub fn fail_next_connect(&self, err: DbError) {
        self.state().connect_faults.push_back(err);
    }

    /// The next `execute()` on any session fails with `err`. Calls queue up.
    pub fn fail_next_execute(&self, err: DbError) {
        self.state().execute_faults.push_back(err);
    }

    /// Rows returned for reads whose SQL starts with `sql_prefix`.
    pub fn stub_rows(&self, sql_prefix: &str, rows: Vec<Row>) {
        self.state().stubs.push((sql_prefix.to_string(), rows));
    }

    pub fn committed(&self) -> Vec<ExecutedStatement> {
        self.state().committed.clone()
    }

    pub fn reads(&self) -> Vec<ExecutedStatement> {
        self.state().reads.clone()
    }

    pub fn rollbacks(&self) -> u64 {
        self.state().rollbacks
    }

    /// Sessions opened since creation.
    pub fn opened(&self) -> u64 {
        self.state().opened
    }

    /// Sessions currently alive.
    pub fn live_connections(&self) -> usize {
        self.state().live
    }

    pub fn peak_live_connections(&self) -> usize {
        self.state().peak_live
    }
}

#[async_trait]
impl ConnectionFactory for InMemoryDatabase {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let mut state = self.state();
        if let Some(err) = state.connect_faults.pop_front() {
            return Err(err);
        }
        state.opened += 1;
        state.live += 1;
        state.peak_live = state.peak_live.max(state.live);
        Ok(Box::new(InMemoryConnection {
            session: state.opened,
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }
}

struct InMemoryConnection {
    session: u64,
    state: Arc<Mutex<DbState>>,
    pending: Vec<ExecutedStatement>,
}

impl InMemoryConnection {
    fn state(&self) -> MutexGuard<'_, DbState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError> {
        let statement = ExecutedStatement {
            session: self.session,
            sql: sql.to_string(),
            params: params.to_vec(),
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = state.execute_faults.pop_front() {
            return Err(err);
        }

        if is_dml(sql) {
            drop(state);
            self.pending.push(statement);
            return Ok(QueryResult::Affected(1));
        }

        let rows = state
            .stubs
            .iter()
            .find(|(prefix, _)| sql.trim_start().starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        state.reads.push(statement);
        Ok(QueryResult::Rows(rows))
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let pending = std::mem::take(&mut self.pending);
        self.state().committed.extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.pending.clear();
        self.state().rollbacks += 1;
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        let mut state = self.state();
        state.live = state.live.saturating_sub(1);
    }
}
