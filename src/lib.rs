//! # Stepline — A Step-Orchestration Engine
//!
//! `stepline` is a small, async workflow engine written in Rust. A workflow
//! is a set of named steps wired together through the inputs each step
//! declares; the engine derives the dependency DAG, schedules independent
//! steps concurrently, and settles every step with exactly one terminal
//! outcome. It supports:
//!
//! - **Step kinds**: Transform, Validate, ExternalCall (budget-gated, with
//!   its own call timeout), and fire-and-forget Emit steps.
//! - **Layered scheduling**: level-ordered layers over the DAG, executed
//!   strictly in sequence with a bounded worker pool inside each layer.
//! - **Conditional execution**: `run_if` over the whole context, or
//!   `run_when` / `skip_when` over a single upstream outcome.
//! - **Failure propagation**: a failed step resolves its dependents to
//!   `NotRun` while independent branches keep executing.
//! - **Retries and timeouts**: per-step retry policies with pluggable
//!   backoff, per-attempt timeouts, and a cooperative run deadline.
//! - **Lifecycle hooks and events**: best-effort `before_all` / `on_error`
//!   / `after_all` hooks, plus a bounded channel of engine events for
//!   observers.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//!
//! use serde_json::json;
//! use stepline::{WorkflowDefinition, WorkflowRunner, WorkflowStep};
//!
//! #[tokio::main]
//! async fn main() {
//!     let definition = WorkflowDefinition::builder("greeting")
//!         .input("name")
//!         .step(
//!             WorkflowStep::transform("greet")
//!                 .input("name")
//!                 .handler_fn(|inputs| async move {
//!                     let name = inputs.require("name")?.clone();
//!                     Ok(json!({ "message": format!("hello, {}", name) }))
//!                 }),
//!         )
//!         .build()
//!         .unwrap();
//!
//!     let runner = WorkflowRunner::new(definition);
//!     let result = runner
//!         .run(HashMap::from([("name".to_string(), json!("stepline"))]))
//!         .await
//!         .unwrap();
//!     println!("{:?}", result.status);
//! }
//! ```

pub mod core;
pub mod definition;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod handler;
pub mod result;
pub mod runner;

pub use crate::core::{
    event_channel, AllowAllBudget, BudgetGuard, CancelSignal, EngineEvent, EventReceiver,
    EventSender, FakeIdGenerator, FakeTimeProvider, HookError, IdGenerator, NoopHooks,
    RealIdGenerator, RealTimeProvider, RunContext, RunHooks, RuntimeContext, SkipReason,
    StepOutcome, TimeProvider,
};
pub use crate::definition::{
    Backoff, RetryPolicy, Settings, StepKind, StepSpec, WorkflowBuilder, WorkflowDefinition,
    WorkflowStep,
};
pub use crate::error::{DefinitionError, StepError, StepFailure, StepFailureKind, WorkflowError};
pub use crate::evaluator::Condition;
pub use crate::graph::{build_plan, ExecutionPlan};
pub use crate::handler::{handler_fn, HandlerResult, StepHandler, StepInputs, ValidationReport};
pub use crate::result::{RunStatus, WorkflowResult};
pub use crate::runner::WorkflowRunner;
