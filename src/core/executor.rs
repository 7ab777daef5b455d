//! Layered dispatch: the run loop that settles every step exactly once.
//!
//! Layers execute strictly in sequence; within a layer, runnable steps
//! share a bounded worker pool. Failures propagate as `NotRun` to
//! dependents while independent branches keep draining, so a failed run
//! still ends with a terminal outcome per step.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::core::budget::BudgetGuard;
use crate::core::cancel::CancelSignal;
use crate::core::context::{RunContext, SkipReason, StepOutcome};
use crate::core::event_bus::{EngineEvent, EventEmitter};
use crate::core::hooks::RunHooks;
use crate::core::runtime::RuntimeContext;
use crate::definition::{RetryPolicy, Settings, StepKind, StepSpec, WorkflowDefinition};
use crate::error::{StepError, StepFailure};
use crate::evaluator::{evaluate_condition, Condition};
use crate::handler::{StepHandler, StepInputs, ValidationReport};
use crate::result::{RunStatus, WorkflowResult};

/// What the pre-dispatch checks concluded for one step.
enum Decision {
    Run,
    Settle(StepOutcome),
}

/// Terminal product of one spawned step task.
struct StepRunOutcome {
    name: String,
    kind: StepKind,
    result: Result<Value, StepFailure>,
}

pub(crate) struct Executor {
    definition: Arc<WorkflowDefinition>,
    context: RunContext,
    budget: Arc<dyn BudgetGuard>,
    hooks: Arc<dyn RunHooks>,
    emitter: EventEmitter,
    runtime: RuntimeContext,
    cancel: CancelSignal,
}

impl Executor {
    pub(crate) fn new(
        definition: Arc<WorkflowDefinition>,
        context: RunContext,
        budget: Arc<dyn BudgetGuard>,
        hooks: Arc<dyn RunHooks>,
        emitter: EventEmitter,
        runtime: RuntimeContext,
    ) -> Self {
        Self {
            definition,
            context,
            budget,
            hooks,
            emitter,
            runtime,
            cancel: CancelSignal::new(),
        }
    }

    /// Runs the plan to completion and assembles the result. Infallible by
    /// construction: every error ends up inside an outcome, never thrown.
    pub(crate) async fn execute(self) -> WorkflowResult {
        let started_at = self.runtime.now();
        let run_id = self.runtime.id_generator.next_id();
        debug!(
            run_id = %run_id,
            workflow = %self.definition.name(),
            steps = self.definition.plan().step_count(),
            "run starting"
        );

        self.emitter
            .emit(EngineEvent::RunStarted {
                run_id: run_id.clone(),
                workflow: self.definition.name().to_string(),
                at: started_at,
            })
            .await;

        if let Err(e) = self.hooks.before_all(&self.context).await {
            warn!(error = %e, "before_all hook failed");
        }

        let settings = self.definition.settings();
        let max_workers = effective_concurrency(settings);
        let deadline = settings
            .run_timeout
            .map(|t| tokio::time::Instant::now() + t);

        let mut first_failure: Option<(String, StepFailure)> = None;
        let mut timed_out = false;

        'layers: for (layer_index, layer) in self.definition.plan().layers().iter().enumerate() {
            // In-flight work checks the deadline through the select below;
            // this catches runs that outlive it between layers.
            if let Some(deadline) = deadline {
                if !timed_out && tokio::time::Instant::now() >= deadline {
                    warn!(layer = layer_index, "run deadline elapsed between layers");
                    timed_out = true;
                    self.cancel.trigger();
                    break;
                }
            }

            let mut queue: VecDeque<&StepSpec> = VecDeque::new();
            for name in layer {
                let Some(spec) = self.definition.step(name) else {
                    continue;
                };
                match self.decide(spec).await {
                    Decision::Run => queue.push_back(spec),
                    Decision::Settle(outcome) => {
                        self.record(&spec.name, spec.kind, outcome, &mut first_failure)
                            .await;
                    }
                }
            }
            debug!(layer = layer_index, runnable = queue.len(), "dispatching layer");

            let mut join_set: JoinSet<StepRunOutcome> = JoinSet::new();
            let mut running: HashMap<tokio::task::Id, String> = HashMap::new();

            loop {
                while !timed_out && join_set.len() < max_workers {
                    let Some(spec) = queue.pop_front() else {
                        break;
                    };
                    let handle = join_set.spawn(Self::run_step(
                        spec.clone(),
                        self.resolve_inputs(spec),
                        effective_retry(settings, spec),
                        effective_timeout(settings, spec),
                        effective_call_timeout(settings, spec),
                        self.emitter.clone(),
                        self.cancel.clone(),
                        self.runtime.clone(),
                    ));
                    running.insert(handle.id(), spec.name.clone());
                }
                if join_set.is_empty() {
                    break;
                }

                let joined = if let Some(deadline) = deadline {
                    tokio::select! {
                        joined = join_set.join_next_with_id() => joined,
                        _ = tokio::time::sleep_until(deadline), if !timed_out => {
                            warn!(
                                in_flight = join_set.len(),
                                "run deadline elapsed, cancelling in-flight steps"
                            );
                            timed_out = true;
                            self.cancel.trigger();
                            queue.clear();
                            // In-flight attempts settle on their own, each
                            // bounded by its per-attempt timeout; the loop
                            // keeps draining until the set is empty.
                            continue;
                        }
                    }
                } else {
                    join_set.join_next_with_id().await
                };
                let Some(joined) = joined else {
                    break;
                };

                match joined {
                    Ok((task_id, step_outcome)) => {
                        running.remove(&task_id);
                        let StepRunOutcome { name, kind, result } = step_outcome;
                        let outcome = match result {
                            Ok(value) => StepOutcome::completed(value),
                            Err(failure) => StepOutcome::Failed { failure },
                        };
                        self.record(&name, kind, outcome, &mut first_failure).await;
                    }
                    Err(join_error) => {
                        // Handler panics are caught inside `run_step`; a task
                        // can only fail here if something outside the handler
                        // (a custom backoff, say) panicked.
                        if let Some(name) = running.remove(&join_error.id()) {
                            let kind = self
                                .definition
                                .step(&name)
                                .map(|s| s.kind)
                                .unwrap_or(StepKind::Transform);
                            let failure =
                                StepError::failure(format!("step task failed: {}", join_error))
                                    .into_failure(1);
                            self.record(&name, kind, StepOutcome::Failed { failure }, &mut first_failure)
                                .await;
                        } else {
                            error!(error = %join_error, "join error for unattributed task");
                        }
                    }
                }
            }

            if timed_out {
                break 'layers;
            }
        }

        // Anything still unpublished never got dispatched.
        for spec in self.definition.steps() {
            if !self.context.contains(&spec.name) {
                self.context.publish(spec.name.clone(), StepOutcome::NotRun);
                self.emitter
                    .emit(EngineEvent::StepFinished {
                        step: spec.name.clone(),
                        outcome: StepOutcome::NotRun,
                        at: self.runtime.now(),
                    })
                    .await;
            }
        }

        let status = if timed_out {
            RunStatus::TimedOut
        } else if let Some((step, failure)) = first_failure {
            RunStatus::Failed { step, failure }
        } else {
            RunStatus::Completed
        };

        // The context also holds the seeded initial inputs; the result
        // reports steps only.
        let mut outcomes = HashMap::with_capacity(self.definition.steps().len());
        for spec in self.definition.steps() {
            if let Some(outcome) = self.context.get(&spec.name) {
                outcomes.insert(spec.name.clone(), outcome);
            }
        }

        let result = WorkflowResult {
            run_id: run_id.clone(),
            workflow: self.definition.name().to_string(),
            status: status.clone(),
            outcomes,
            started_at,
            finished_at: self.runtime.now(),
        };

        if let Err(e) = self.hooks.after_all(&self.context, &result).await {
            warn!(error = %e, "after_all hook failed");
        }
        self.emitter
            .emit(EngineEvent::RunFinished {
                run_id,
                status,
                at: result.finished_at,
            })
            .await;
        result
    }

    /// Propagation, then condition, then budget; any of them can settle
    /// the step without dispatching it.
    async fn decide(&self, spec: &StepSpec) -> Decision {
        let suppresses = spec
            .condition
            .as_ref()
            .map(Condition::suppresses_propagation)
            .unwrap_or(false);
        if !suppresses {
            for input in &spec.inputs {
                if let Some(outcome) = self.context.get(input) {
                    if !outcome.is_completed() {
                        debug!(step = %spec.name, input = %input, "ancestor not completed, propagating");
                        return Decision::Settle(StepOutcome::NotRun);
                    }
                }
            }
        }

        if let Some(condition) = &spec.condition {
            if !evaluate_condition(condition, &self.context) {
                debug!(step = %spec.name, "condition not met");
                return Decision::Settle(StepOutcome::Skipped {
                    reason: SkipReason::ConditionNotMet,
                });
            }
        }

        if spec.kind == StepKind::ExternalCall
            && !self.budget.allow(&spec.name, &self.context).await
        {
            debug!(step = %spec.name, "budget exhausted");
            return Decision::Settle(StepOutcome::Skipped {
                reason: SkipReason::BudgetExhausted,
            });
        }

        Decision::Run
    }

    fn resolve_inputs(&self, spec: &StepSpec) -> StepInputs {
        let outcomes = spec
            .inputs
            .iter()
            .filter_map(|name| self.context.get(name).map(|outcome| (name.clone(), outcome)))
            .collect();
        StepInputs::new(outcomes, self.cancel.clone())
    }

    /// Publishes the terminal outcome, exactly once per step, and keeps
    /// the first fatal failure for the run status.
    async fn record(
        &self,
        name: &str,
        kind: StepKind,
        outcome: StepOutcome,
        first_failure: &mut Option<(String, StepFailure)>,
    ) {
        if kind == StepKind::Validate {
            if let StepOutcome::Completed { value } = &outcome {
                if let Some(report) = ValidationReport::from_value(value) {
                    if !report.valid {
                        debug!(step = %name, errors = report.errors.len(), "validation reported invalid");
                    }
                }
            }
        }

        self.context.publish(name.to_string(), outcome.clone());

        if let StepOutcome::Failed { failure } = &outcome {
            if kind == StepKind::Emit {
                warn!(step = %name, error = %failure.message, "emit step failed, continuing");
            } else if first_failure.is_none() {
                error!(step = %name, error = %failure.message, "step failed");
                *first_failure = Some((name.to_string(), failure.clone()));
                if let Err(e) = self.hooks.on_error(name, failure, &self.context).await {
                    warn!(error = %e, "on_error hook failed");
                }
            }
        }

        self.emitter
            .emit(EngineEvent::StepFinished {
                step: name.to_string(),
                outcome,
                at: self.runtime.now(),
            })
            .await;
    }

    /// One step, start to terminal: attempts, per-attempt timeout, backoff
    /// between retries. Runs inside its own task.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        spec: StepSpec,
        inputs: StepInputs,
        policy: RetryPolicy,
        attempt_timeout: Duration,
        call_timeout: Option<Duration>,
        emitter: EventEmitter,
        cancel: CancelSignal,
        runtime: RuntimeContext,
    ) -> StepRunOutcome {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            emitter
                .emit(EngineEvent::StepStarted {
                    step: spec.name.clone(),
                    attempt,
                    at: runtime.now(),
                })
                .await;

            let exec_future =
                AssertUnwindSafe(Self::invoke_handler(&spec.handler, inputs.clone(), call_timeout))
                    .catch_unwind();
            let exec_result = match tokio::time::timeout(attempt_timeout, exec_future).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(StepError::Panicked(panic_message(payload))),
                Err(_) => Err(StepError::AttemptTimeout(attempt_timeout)),
            };

            match exec_result {
                Ok(value) => {
                    return StepRunOutcome {
                        name: spec.name,
                        kind: spec.kind,
                        result: Ok(value),
                    };
                }
                Err(e) => {
                    let should_retry =
                        attempt < max_attempts && e.is_retryable() && !cancel.is_triggered();
                    if !should_retry {
                        return StepRunOutcome {
                            name: spec.name,
                            kind: spec.kind,
                            result: Err(e.into_failure(attempt)),
                        };
                    }

                    let delay = policy.backoff.delay(attempt);
                    warn!(
                        step = %spec.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "step attempt failed, retrying"
                    );
                    emitter
                        .emit(EngineEvent::StepRetrying {
                            step: spec.name.clone(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            error: e.to_string(),
                            at: runtime.now(),
                        })
                        .await;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// External calls get their own tighter bound nested inside the
    /// general attempt timeout.
    async fn invoke_handler(
        handler: &Arc<dyn StepHandler>,
        inputs: StepInputs,
        call_timeout: Option<Duration>,
    ) -> Result<Value, StepError> {
        let fut = handler.call(inputs);
        match call_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(StepError::CallTimeout(limit)),
            },
            None => fut.await,
        }
    }
}

fn effective_timeout(settings: &Settings, spec: &StepSpec) -> Duration {
    match spec.timeout {
        Some(t) if !t.is_zero() => t,
        _ => settings.default_timeout,
    }
}

fn effective_retry(settings: &Settings, spec: &StepSpec) -> RetryPolicy {
    spec.retry
        .clone()
        .unwrap_or_else(|| settings.default_retry.clone())
}

fn effective_call_timeout(settings: &Settings, spec: &StepSpec) -> Option<Duration> {
    (spec.kind == StepKind::ExternalCall)
        .then(|| spec.call_timeout.unwrap_or(settings.call_timeout))
}

fn effective_concurrency(settings: &Settings) -> usize {
    if settings.max_concurrency > 0 {
        settings.max_concurrency
    } else {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;

    fn spec(kind: StepKind) -> StepSpec {
        StepSpec {
            name: "s".into(),
            kind,
            inputs: vec![],
            condition: None,
            timeout: None,
            retry: None,
            call_timeout: None,
            handler: handler_fn(|_| async { Ok(json!(null)) }),
        }
    }

    #[test]
    fn test_zero_timeout_means_default() {
        let settings = Settings::default();
        let mut s = spec(StepKind::Transform);
        s.timeout = Some(Duration::ZERO);
        assert_eq!(effective_timeout(&settings, &s), settings.default_timeout);

        s.timeout = Some(Duration::from_secs(3));
        assert_eq!(effective_timeout(&settings, &s), Duration::from_secs(3));
    }

    #[test]
    fn test_call_timeout_only_for_external_calls() {
        let settings = Settings::default();
        assert_eq!(
            effective_call_timeout(&settings, &spec(StepKind::ExternalCall)),
            Some(settings.call_timeout)
        );
        assert_eq!(effective_call_timeout(&settings, &spec(StepKind::Transform)), None);

        let mut tight = spec(StepKind::ExternalCall);
        tight.call_timeout = Some(Duration::from_millis(250));
        assert_eq!(
            effective_call_timeout(&settings, &tight),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_concurrency_cap() {
        let capped = Settings {
            max_concurrency: 2,
            ..Settings::default()
        };
        assert_eq!(effective_concurrency(&capped), 2);

        let uncapped = Settings {
            max_concurrency: 0,
            ..Settings::default()
        };
        assert!(effective_concurrency(&uncapped) >= 1);
    }

    #[test]
    fn test_step_retry_falls_back_to_default() {
        let settings = Settings {
            default_retry: RetryPolicy::fixed(4, Duration::from_millis(5)),
            ..Settings::default()
        };
        let s = spec(StepKind::Transform);
        assert_eq!(effective_retry(&settings, &s).max_attempts, 4);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("kaboom")), "kaboom");
        assert_eq!(panic_message(Box::new(String::from("kaboom"))), "kaboom");
        assert_eq!(panic_message(Box::new(42u8)), "opaque panic payload");
    }
}
