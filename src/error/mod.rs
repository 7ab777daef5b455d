//! Error types for the orchestration engine.
//!
//! - [`StepError`] — Errors raised during individual step execution.
//! - [`StepFailure`] — Serializable failure record kept in step outcomes.
//! - [`DefinitionError`] — Definition validation errors, surfaced before any step runs.
//! - [`WorkflowError`] — Top-level errors for building and launching a run.

pub mod step_error;
pub mod workflow_error;

pub use step_error::{StepError, StepFailure, StepFailureKind};
pub use workflow_error::{DefinitionError, WorkflowError};
