use std::fmt;
use std::sync::Arc;

use crate::core::context::{RunContext, StepOutcome};

/// Predicate over the whole run context.
pub type ContextPredicate = Arc<dyn Fn(&RunContext) -> bool + Send + Sync>;

/// Predicate over a single referenced outcome.
pub type OutcomePredicate = Arc<dyn Fn(&StepOutcome) -> bool + Send + Sync>;

/// Gate attached to a step. At most one per step; a step combining forms
/// fails definition validation.
///
/// Evaluated only once every declared input of the step is terminal.
/// `RunIf` and `RunWhen` also suppress default failure propagation for
/// their step, letting it run (or skip) on its own terms after an ancestor
/// failed; `SkipWhen` does not.
#[derive(Clone)]
pub enum Condition {
    /// Run when the predicate over the context holds, skip otherwise.
    RunIf(ContextPredicate),
    /// Run when the predicate over the named step's outcome holds. The
    /// predicate receives whatever outcome the step ended with, sentinel
    /// variants included, and must handle them explicitly.
    RunWhen {
        step: String,
        predicate: OutcomePredicate,
    },
    /// Exact negation of `RunWhen` at the decision point.
    SkipWhen {
        step: String,
        predicate: OutcomePredicate,
    },
}

impl Condition {
    pub fn run_if(predicate: impl Fn(&RunContext) -> bool + Send + Sync + 'static) -> Self {
        Condition::RunIf(Arc::new(predicate))
    }

    pub fn run_when(
        step: impl Into<String>,
        predicate: impl Fn(&StepOutcome) -> bool + Send + Sync + 'static,
    ) -> Self {
        Condition::RunWhen {
            step: step.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn skip_when(
        step: impl Into<String>,
        predicate: impl Fn(&StepOutcome) -> bool + Send + Sync + 'static,
    ) -> Self {
        Condition::SkipWhen {
            step: step.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The step a `RunWhen`/`SkipWhen` inspects.
    pub fn target(&self) -> Option<&str> {
        match self {
            Condition::RunIf(_) => None,
            Condition::RunWhen { step, .. } | Condition::SkipWhen { step, .. } => Some(step),
        }
    }

    pub(crate) fn suppresses_propagation(&self) -> bool {
        matches!(self, Condition::RunIf(_) | Condition::RunWhen { .. })
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::RunIf(_) => f.write_str("RunIf"),
            Condition::RunWhen { step, .. } => {
                f.debug_struct("RunWhen").field("step", step).finish()
            }
            Condition::SkipWhen { step, .. } => {
                f.debug_struct("SkipWhen").field("step", step).finish()
            }
        }
    }
}

/// Evaluates a step's condition against the context. `true` means run.
pub fn evaluate_condition(condition: &Condition, context: &RunContext) -> bool {
    match condition {
        Condition::RunIf(predicate) => predicate(context),
        Condition::RunWhen { step, predicate } => {
            let outcome = context.get(step).unwrap_or(StepOutcome::NotRun);
            predicate(&outcome)
        }
        Condition::SkipWhen { step, predicate } => {
            let outcome = context.get(step).unwrap_or(StepOutcome::NotRun);
            !predicate(&outcome)
        }
    }
}
