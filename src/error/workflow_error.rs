//! Definition- and run-level error types.

use thiserror::Error;

/// Errors raised while validating a workflow definition. These surface from
/// `build()` before any step can execute.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),
    #[error("Step '{step}' references unknown input '{input}'")]
    UnknownInput { step: String, input: String },
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),
    #[error("Step '{0}' declares more than one condition")]
    ConflictingConditions(String),
    #[error("Condition on step '{step}' references '{target}', which is not one of its inputs")]
    ConditionTargetNotDeclared { step: String, target: String },
    #[error("Step '{0}' has no handler")]
    MissingHandler(String),
    #[error("Workflow has no steps")]
    EmptyWorkflow,
    #[error("Invalid retry policy on step '{step}': {reason}")]
    InvalidRetryPolicy { step: String, reason: String },
}

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("Missing initial input: {0}")]
    MissingInput(String),
    #[error("Undeclared initial input: {0}")]
    UndeclaredInput(String),
}
