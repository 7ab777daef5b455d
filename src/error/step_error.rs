use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Step-level errors
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Handler error: {0}")]
    Handler(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Input not available: {0}")]
    InputUnavailable(String),
    #[error("Attempt timed out after {0:?}")]
    AttemptTimeout(Duration),
    #[error("External call timed out after {0:?}")]
    CallTimeout(Duration),
    #[error("Cancelled before completion")]
    Cancelled,
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// Shorthand for a handler-raised failure.
    pub fn failure(message: impl Into<String>) -> Self {
        StepError::Handler(message.into())
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StepError::Cancelled | StepError::InputUnavailable(_) | StepError::Panicked(_)
        )
    }

    pub fn kind(&self) -> StepFailureKind {
        match self {
            StepError::Handler(_) | StepError::Panicked(_) => StepFailureKind::Handler,
            StepError::Serialization(_) => StepFailureKind::Serialization,
            StepError::InputUnavailable(_) => StepFailureKind::Handler,
            StepError::AttemptTimeout(_) | StepError::CallTimeout(_) => StepFailureKind::Timeout,
            StepError::Cancelled => StepFailureKind::Cancelled,
        }
    }

    pub(crate) fn into_failure(self, attempts: u32) -> StepFailure {
        StepFailure {
            kind: self.kind(),
            message: self.to_string(),
            attempts,
        }
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::Serialization(e.to_string())
    }
}

/// Serializable record of a terminal step failure, kept in the run result
/// after the live error has been consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepFailureKind,
    pub message: String,
    /// Attempts consumed before the failure became terminal.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailureKind {
    Handler,
    Serialization,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempts)", self.message, self.attempts)
    }
}
