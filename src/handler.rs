//! The injected work contract: opaque callables the engine schedules.
//!
//! Handlers receive only the inputs their step declared, never the whole
//! context. External integrations (model calls, scoring services,
//! notification fan-out) live behind this trait in downstream crates.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::cancel::CancelSignal;
use crate::core::context::StepOutcome;
use crate::error::StepError;

/// Convenience alias for what handlers return.
pub type HandlerResult = Result<Value, StepError>;

/// Resolved inputs handed to a step handler for one attempt.
#[derive(Clone)]
pub struct StepInputs {
    values: HashMap<String, Value>,
    outcomes: HashMap<String, StepOutcome>,
    cancel: CancelSignal,
}

impl StepInputs {
    pub(crate) fn new(outcomes: HashMap<String, StepOutcome>, cancel: CancelSignal) -> Self {
        let values = outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.value().map(|v| (name.clone(), v.clone())))
            .collect();
        Self {
            values,
            outcomes,
            cancel,
        }
    }

    /// The completed value of a declared input, when its producer completed.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Like [`value`](Self::value), but failing the attempt when absent.
    pub fn require(&self, name: &str) -> Result<&Value, StepError> {
        self.values
            .get(name)
            .ok_or_else(|| StepError::InputUnavailable(name.to_string()))
    }

    /// Full outcome of a declared input. Steps that opted into running past
    /// an ancestor failure inspect the non-completed variants here.
    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.outcomes.get(name)
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Cancellation handle for the run; long handlers should observe it.
    pub fn cancellation(&self) -> &CancelSignal {
        &self.cancel
    }
}

/// A unit of injected work. One implementor per step; the engine decides
/// when (and whether) it runs.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, inputs: StepInputs) -> HandlerResult;
}

/// Adapts an async closure into a [`StepHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(StepInputs) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn call(&self, inputs: StepInputs) -> HandlerResult {
        (self.f)(inputs).await
    }
}

/// Wraps an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(StepInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// The value shape validate-step handlers produce. A failed validation is
/// data, not a fault: the step completes with `valid: false` and downstream
/// conditions branch on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            valid: false,
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
