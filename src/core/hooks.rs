//! Lifecycle hooks around a run.

use async_trait::async_trait;

use crate::core::context::RunContext;
use crate::error::StepFailure;
use crate::result::WorkflowResult;

/// Failure a hook may report; logged at `warn` and never re-thrown.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Best-effort callbacks observing a run. A hook error never alters step
/// outcomes or the run status.
#[async_trait]
pub trait RunHooks: Send + Sync {
    /// Runs after the context is seeded, before the first layer.
    async fn before_all(&self, _context: &RunContext) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs once per run, at the first fatal (non-emit) step failure.
    async fn on_error(
        &self,
        _step: &str,
        _failure: &StepFailure,
        _context: &RunContext,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs after every step is terminal and the result is assembled.
    async fn after_all(
        &self,
        _context: &RunContext,
        _result: &WorkflowResult,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Default [`RunHooks`]: does nothing.
#[derive(Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl RunHooks for NoopHooks {}
