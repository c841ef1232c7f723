//! State - ワーカースロットの状態

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one worker execution slot.
///
/// - Idle -> Claimed: a ready delivery was received (still unacknowledged)
/// - Claimed -> Executing -> Acknowledging -> Idle
/// - Executing -> Idle: failure requeued with a delay (original is acked after republish)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    #[default]
    Idle,
    Claimed,
    Executing,
    Acknowledging,
    Stopped,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Idle => "idle",
            SlotState::Claimed => "claimed",
            SlotState::Executing => "executing",
            SlotState::Acknowledging => "acknowledging",
            SlotState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
