//! Retry policy engine: per-type budgets and the decision after each attempt.

mod engine;
mod policy;

pub use engine::{Admission, AttemptTicket, RetryEngine, RetryState};
pub use policy::{Backoff, RetryPolicies, RetryPolicy};
