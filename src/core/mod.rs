pub mod budget;
pub mod cancel;
pub mod context;
pub mod event_bus;
pub(crate) mod executor;
pub mod hooks;
pub mod runtime;

pub use budget::{AllowAllBudget, BudgetGuard};
pub use cancel::CancelSignal;
pub use context::{RunContext, SkipReason, StepOutcome};
pub use event_bus::{event_channel, EngineEvent, EventEmitter, EventReceiver, EventSender};
pub use hooks::{HookError, NoopHooks, RunHooks};
pub use runtime::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
