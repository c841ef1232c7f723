//! Domain model (ids, task types, envelopes, outcomes, decisions, errors).

pub mod attempt;
pub mod decision;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task_type;

pub use attempt::DeliveryAttempt;
pub use decision::Decision;
pub use envelope::{MAX_PRIORITY, Priority, TaskEnvelope};
pub use errors::{ErrorKind, TaskError};
pub use ids::{AttemptId, TaskId};
pub use outcome::{Outcome, OutcomeKind};
pub use state::SlotState;
pub use task_type::TaskType;
