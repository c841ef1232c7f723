//! Retry policy: attempt budget and backoff delays per task type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },

    /// delay = base * multiplier^(attempts - 1)
    Exponential { base_ms: u64, multiplier: f64 },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before the retry that follows `attempts` failed attempts (1-indexed).
    ///
    /// With base=2s, multiplier=2.0: 2s, 4s, 8s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                base_ms,
                multiplier,
            } => {
                let base_secs = Duration::from_millis(base_ms).as_secs_f64();
                let delay_secs = base_secs * multiplier.powi(attempts.saturating_sub(1) as i32);
                Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed, the first one included.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::fixed(delay),
        }
    }
}

/// Policy table, one entry per task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicies {
    pub normal_submission: RetryPolicy,
    pub premium_submission: RetryPolicy,
    pub winner_trigger: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            normal_submission: RetryPolicy::fixed(3, Duration::from_secs(5)),
            premium_submission: RetryPolicy::fixed(5, Duration::from_secs(10)),
            winner_trigger: RetryPolicy::fixed(3, Duration::from_secs(15)),
        }
    }
}

impl RetryPolicies {
    pub fn for_type(&self, task_type: TaskType) -> RetryPolicy {
        match task_type {
            TaskType::NormalSubmission => self.normal_submission,
            TaskType::PremiumSubmission => self.premium_submission,
            TaskType::WinnerTrigger => self.winner_trigger,
        }
    }

    pub fn set(&mut self, task_type: TaskType, policy: RetryPolicy) {
        match task_type {
            TaskType::NormalSubmission => self.normal_submission = policy,
            TaskType::PremiumSubmission => self.premium_submission = policy,
            TaskType::WinnerTrigger => self.winner_trigger = policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskType::NormalSubmission, 3, 5)]
    #[case(TaskType::PremiumSubmission, 5, 10)]
    #[case(TaskType::WinnerTrigger, 3, 15)]
    fn default_table(#[case] task_type: TaskType, #[case] max: u32, #[case] delay_secs: u64) {
        let policy = RetryPolicies::default().for_type(task_type);
        assert_eq!(policy.max_attempts, max);
        assert_eq!(policy.backoff.next_delay(1), Duration::from_secs(delay_secs));
        assert_eq!(policy.backoff.next_delay(4), Duration::from_secs(delay_secs));
    }

    #[test]
    fn exponential_backoff_increases() {
        let backoff = Backoff::Exponential {
            base_ms: 2_000,
            multiplier: 2.0,
        };
        assert_eq!(backoff.next_delay(1), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(2), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn policy_table_deserializes() {
        let json = r#"{
            "normal_submission": {"max_attempts": 2, "backoff": {"kind": "fixed", "delay_ms": 100}},
            "premium_submission": {"max_attempts": 5, "backoff": {"kind": "exponential", "base_ms": 1000, "multiplier": 3.0}},
            "winner_trigger": {"max_attempts": 1, "backoff": {"kind": "fixed", "delay_ms": 0}}
        }"#;
        let table: RetryPolicies = serde_json::from_str(json).unwrap();
        assert_eq!(table.for_type(TaskType::NormalSubmission).max_attempts, 2);
        assert_eq!(
            table.for_type(TaskType::PremiumSubmission).backoff.next_delay(2),
            Duration::from_secs(3)
        );
    }
}
