//! Workflow definitions: immutable step lists plus the settings a run
//! inherits. Built through [`WorkflowDefinition::builder`], validated once,
//! reusable across runs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::context::{RunContext, StepOutcome};
use crate::error::DefinitionError;
use crate::evaluator::Condition;
use crate::graph::{build_plan, ExecutionPlan};
use crate::handler::{handler_fn, HandlerResult, StepHandler, StepInputs};

/// What a step does, which decides how the engine wraps its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Pure computation over inputs; timeout and retry apply, nothing else.
    Transform,
    /// Produces a `{valid, errors}` value; `valid: false` still completes.
    Validate,
    /// Crosses a network boundary: budget-gated and wrapped in the tighter
    /// call timeout on top of the general one.
    ExternalCall,
    /// Fire-and-forget notification; failures are recorded but never fail
    /// the run.
    Emit,
}

/// Backoff schedule between retry attempts, a pure function of the
/// just-failed attempt number (1-based).
#[derive(Clone)]
pub enum Backoff {
    Fixed(Duration),
    /// Delay grows by the base each attempt: `base * attempt`.
    Linear(Duration),
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
        jitter: bool,
    },
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear(base) => *base * attempt,
            Backoff::Exponential {
                base,
                multiplier,
                max,
                jitter,
            } => {
                let mut millis =
                    base.as_millis() as f64 * multiplier.powi(attempt.saturating_sub(1) as i32);
                if *jitter {
                    millis += rand::random::<f64>() * millis * 0.1;
                }
                Duration::from_millis((millis as u64).min(max.as_millis() as u64))
            }
            Backoff::Custom(f) => f(attempt),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(Duration::from_millis(1000))
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Backoff::Linear(d) => f.debug_tuple("Linear").field(d).finish(),
            Backoff::Exponential {
                base,
                multiplier,
                max,
                jitter,
            } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("multiplier", multiplier)
                .field("max", max)
                .field("jitter", jitter)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Retry policy for one step: total attempts (1 = no retry) plus backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::default(),
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base,
                multiplier: 2.0,
                max: Duration::from_secs(30),
                jitter: true,
            },
        }
    }
}

/// Definition-wide settings every step inherits unless it declares its own.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Per-attempt bound for steps without their own timeout.
    pub default_timeout: Duration,
    /// Policy for steps without their own retry declaration.
    pub default_retry: RetryPolicy,
    /// Tighter bound wrapped around every external-call handler invocation.
    pub call_timeout: Duration,
    /// Overall run deadline; in-flight handlers are signalled to wind
    /// down when it elapses.
    pub run_timeout: Option<Duration>,
    /// Worker cap within a layer; 0 means available parallelism.
    pub max_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_retry: RetryPolicy::none(),
            call_timeout: Duration::from_secs(10),
            run_timeout: None,
            max_concurrency: 0,
        }
    }
}

/// A single validated step of a definition.
#[derive(Clone)]
pub struct StepSpec {
    pub name: String,
    pub kind: StepKind,
    /// Names this step reads; each resolves to an initial-input key or
    /// another step, and every step-name entry is a dependency edge.
    pub inputs: Vec<String>,
    pub condition: Option<Condition>,
    /// Per-attempt bound; `None` and zero both mean the definition default.
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// External-call bound overriding the definition default.
    pub call_timeout: Option<Duration>,
    pub handler: Arc<dyn StepHandler>,
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("condition", &self.condition)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// Builder for one step. Start from the kind constructor, chain the rest.
pub struct WorkflowStep {
    name: String,
    kind: StepKind,
    inputs: Vec<String>,
    conditions: Vec<Condition>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    call_timeout: Option<Duration>,
    handler: Option<Arc<dyn StepHandler>>,
}

impl WorkflowStep {
    fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            conditions: Vec::new(),
            timeout: None,
            retry: None,
            call_timeout: None,
            handler: None,
        }
    }

    pub fn transform(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Transform)
    }

    pub fn validate(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Validate)
    }

    pub fn external_call(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::ExternalCall)
    }

    pub fn emit(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Emit)
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn run_if(mut self, predicate: impl Fn(&RunContext) -> bool + Send + Sync + 'static) -> Self {
        self.conditions.push(Condition::run_if(predicate));
        self
    }

    pub fn run_when(
        mut self,
        step: impl Into<String>,
        predicate: impl Fn(&StepOutcome) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conditions.push(Condition::run_when(step, predicate));
        self
    }

    pub fn skip_when(
        mut self,
        step: impl Into<String>,
        predicate: impl Fn(&StepOutcome) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conditions.push(Condition::skip_when(step, predicate));
        self
    }

    /// Per-attempt bound. Zero means "use the definition default".
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// External-call bound for this step only.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn handler_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepInputs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler = Some(handler_fn(f));
        self
    }

    fn into_spec(mut self) -> Result<StepSpec, DefinitionError> {
        if self.conditions.len() > 1 {
            return Err(DefinitionError::ConflictingConditions(self.name));
        }
        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(DefinitionError::InvalidRetryPolicy {
                    step: self.name,
                    reason: "max_attempts must be at least 1".into(),
                });
            }
        }
        let handler = match self.handler.take() {
            Some(handler) => handler,
            None => return Err(DefinitionError::MissingHandler(self.name)),
        };
        Ok(StepSpec {
            name: self.name,
            kind: self.kind,
            inputs: self.inputs,
            condition: self.conditions.pop(),
            timeout: self.timeout,
            retry: self.retry,
            call_timeout: self.call_timeout,
            handler,
        })
    }
}

/// Builder for a whole definition.
pub struct WorkflowBuilder {
    name: String,
    version: String,
    initial_inputs: Vec<String>,
    steps: Vec<WorkflowStep>,
    settings: Settings,
}

impl WorkflowBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1".into(),
            initial_inputs: Vec::new(),
            steps: Vec::new(),
            settings: Settings::default(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Declares an initial-input key the caller must supply at run time.
    pub fn input(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.initial_inputs.contains(&key) {
            self.initial_inputs.push(key);
        }
        self
    }

    pub fn inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self = self.input(key);
        }
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.settings.default_timeout = timeout;
        self
    }

    pub fn default_retry(mut self, policy: RetryPolicy) -> Self {
        self.settings.default_retry = policy;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.settings.call_timeout = timeout;
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.settings.run_timeout = Some(timeout);
        self
    }

    pub fn max_concurrency(mut self, cap: usize) -> Self {
        self.settings.max_concurrency = cap;
        self
    }

    /// Validates the definition and pre-computes its execution plan.
    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::EmptyWorkflow);
        }
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            steps.push(step.into_spec()?);
        }
        let plan = build_plan(&self.initial_inputs, &steps)?;
        Ok(WorkflowDefinition {
            name: self.name,
            version: self.version,
            initial_inputs: self.initial_inputs,
            steps,
            settings: self.settings,
            plan,
        })
    }
}

/// An immutable, validated workflow. Cheap to clone and safe to run
/// repeatedly; the execution plan is computed once at build time.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    version: String,
    initial_inputs: Vec<String>,
    steps: Vec<StepSpec>,
    settings: Settings,
    plan: ExecutionPlan,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn initial_inputs(&self) -> &[String] {
        &self.initial_inputs
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }
}
