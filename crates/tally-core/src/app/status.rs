//! Status - 稼働中ワーカーのスナップショット

use serde::Serialize;

use crate::domain::SlotState;
use crate::pool::PoolStatus;
use crate::ports::QueueCounts;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub queues: Vec<QueueCounts>,
    pub pool: PoolStatus,
    pub slots: Vec<SlotState>,
    /// Tasks with an attempt running, or a failed requeue held, in this process.
    pub tracked_retries: usize,
}

impl StatusReport {
    pub fn busy_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s, SlotState::Idle | SlotState::Stopped))
            .count()
    }

    pub fn backlog(&self) -> usize {
        self.queues.iter().map(|q| q.ready + q.scheduled).sum()
    }
}
