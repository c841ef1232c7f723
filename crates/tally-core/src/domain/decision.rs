//! Decision model: what the worker does with a delivery once the attempt ends.

use std::time::Duration;

use super::errors::TaskError;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The attempt succeeded; settle the delivery.
    Ack { attempts_made: u32 },

    /// Publish the task again, visible after `delay`.
    Requeue { delay: Duration, attempts_made: u32 },

    /// Stop retrying. `error` is either the fatal error itself or
    /// `TaskError::RetriesExhausted`.
    GiveUp { attempts_made: u32, error: TaskError },
}

impl Decision {
    pub fn attempts_made(&self) -> u32 {
        match self {
            Decision::Ack { attempts_made }
            | Decision::Requeue { attempts_made, .. }
            | Decision::GiveUp { attempts_made, .. } => *attempts_made,
        }
    }

    pub fn is_give_up(&self) -> bool {
        matches!(self, Decision::GiveUp { .. })
    }
}
