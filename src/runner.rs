//! High-level run entry point.
//!
//! [`WorkflowRunner`] binds a validated [`WorkflowDefinition`] to the
//! run-scoped collaborators: budget guard, lifecycle hooks, event channel,
//! and runtime context. One runner can drive any number of runs; each call
//! to [`run`](WorkflowRunner::run) gets a fresh context and cancel signal.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::core::budget::{AllowAllBudget, BudgetGuard};
use crate::core::context::RunContext;
use crate::core::event_bus::{EventEmitter, EventSender};
use crate::core::executor::Executor;
use crate::core::hooks::{NoopHooks, RunHooks};
use crate::core::runtime::RuntimeContext;
use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;
use crate::result::WorkflowResult;

pub struct WorkflowRunner {
    definition: Arc<WorkflowDefinition>,
    budget: Arc<dyn BudgetGuard>,
    hooks: Arc<dyn RunHooks>,
    events: Option<EventSender>,
    runtime: RuntimeContext,
}

impl WorkflowRunner {
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
            budget: Arc::new(AllowAllBudget),
            hooks: Arc::new(NoopHooks),
            events: None,
            runtime: RuntimeContext::default(),
        }
    }

    /// Replaces the default allow-everything budget guard.
    pub fn budget(mut self, budget: Arc<dyn BudgetGuard>) -> Self {
        self.budget = budget;
        self
    }

    /// Installs lifecycle hooks for the runs driven by this runner.
    pub fn hooks(mut self, hooks: Arc<dyn RunHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Streams [`EngineEvent`](crate::core::EngineEvent)s to `sender`
    /// during each run.
    pub fn events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    /// Swaps in a custom clock / id source, mainly for tests.
    pub fn runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Executes the workflow once over `initial_input`.
    ///
    /// The input map must match the declared initial inputs exactly; a
    /// missing or undeclared key fails here, before any step runs. Step
    /// failures do not surface as `Err`: they land in the returned
    /// [`WorkflowResult`].
    pub async fn run(
        &self,
        initial_input: HashMap<String, Value>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let context = self.seed_context(initial_input)?;
        debug!(workflow = %self.definition.name(), "initial inputs seeded");

        let emitter = match &self.events {
            Some(tx) => EventEmitter::new(tx.clone()),
            None => EventEmitter::disabled(),
        };
        let executor = Executor::new(
            Arc::clone(&self.definition),
            context,
            Arc::clone(&self.budget),
            Arc::clone(&self.hooks),
            emitter,
            self.runtime.clone(),
        );
        Ok(executor.execute().await)
    }

    fn seed_context(
        &self,
        mut initial_input: HashMap<String, Value>,
    ) -> Result<RunContext, WorkflowError> {
        let context = RunContext::new();
        for name in self.definition.initial_inputs() {
            match initial_input.remove(name) {
                Some(value) => context.seed(name.clone(), value),
                None => return Err(WorkflowError::MissingInput(name.clone())),
            }
        }
        if let Some(extra) = initial_input.into_keys().next() {
            return Err(WorkflowError::UndeclaredInput(extra));
        }
        Ok(context)
    }
}
