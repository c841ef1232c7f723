//! Outcome model: the result of a single execution attempt.

use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, TaskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Retryable,
    Fatal,
}

/// What happened during one attempt.
///
/// The error is classified once, here, so the retry engine only looks at the
/// variant and never re-inspects error strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(String),
    Retryable(TaskError),
    Fatal(TaskError),
}

impl Outcome {
    pub fn from_result(result: Result<String, TaskError>) -> Self {
        match result {
            Ok(message) => Outcome::Success(message),
            Err(err) => match err.kind() {
                ErrorKind::Retryable => Outcome::Retryable(err),
                ErrorKind::Fatal => Outcome::Fatal(err),
            },
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Retryable(_) => OutcomeKind::Retryable,
            Outcome::Fatal(_) => OutcomeKind::Fatal,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Retryable(err) | Outcome::Fatal(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn from_result_classifies_errors() {
        let ok = Outcome::from_result(Ok("done".into()));
        assert_eq!(ok.kind(), OutcomeKind::Success);
        assert!(ok.error().is_none());

        let transient = Outcome::from_result(Err(TaskError::PoolExhausted(Duration::from_secs(1))));
        assert_eq!(transient.kind(), OutcomeKind::Retryable);

        let bad = Outcome::from_result(Err(TaskError::MalformedPayload("not json".into())));
        assert_eq!(bad.kind(), OutcomeKind::Fatal);
    }

    #[test]
    fn outcome_kind_serializes_as_screaming_case() {
        let s = serde_json::to_string(&OutcomeKind::Retryable).unwrap();
        assert_eq!(s, "\"RETRYABLE\"");
    }
}
