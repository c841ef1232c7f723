use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::TaskId;
use crate::ports::{ResultRecord, ResultStore, ResultStoreError};

/// Result backend kept in process memory. Latest record per task wins.
#[derive(Clone, Default)]
pub struct InMemoryResultStore {
    records: Arc<Mutex<HashMap<TaskId, ResultRecord>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<TaskId, ResultRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn all(&self) -> Vec<ResultRecord> {
        let mut all: Vec<_> = self.records().values().cloned().collect();
        all.sort_by_key(|r| r.recorded_at);
        all
    }

    pub fn failures(&self) -> Vec<ResultRecord> {
        self.all().into_iter().filter(|r| r.is_failure()).collect()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn record(&self, record: ResultRecord) -> Result<(), ResultStoreError> {
        self.records().insert(record.task_id, record);
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<ResultRecord>, ResultStoreError> {
        Ok(self.records().get(&task_id).cloned())
    }
}
