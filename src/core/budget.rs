//! Budget gate consulted before external calls.
//!
//! The [`BudgetGuard`] is the engine's only view of billing: a yes/no
//! answer per external-call step. Metering, quotas and pricing live with
//! the caller behind this trait.

use async_trait::async_trait;

use crate::core::context::RunContext;

/// Gate deciding whether an external-call step may dispatch.
///
/// Consulted once per step, after its condition passed and before its
/// handler is invoked. A `false` settles the step as
/// `Skipped(budget_exhausted)`: not an error, never retried, and
/// downstream steps see an ordinary skip.
#[async_trait]
pub trait BudgetGuard: Send + Sync {
    async fn allow(&self, step: &str, context: &RunContext) -> bool;
}

/// Default [`BudgetGuard`]: everything is allowed.
#[derive(Debug, Default)]
pub struct AllowAllBudget;

#[async_trait]
impl BudgetGuard for AllowAllBudget {
    async fn allow(&self, _step: &str, _context: &RunContext) -> bool {
        true
    }
}
