use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cooperative cancellation handle shared between the engine and in-flight
/// handlers. Triggered when the run deadline elapses; handlers should
/// observe it and return promptly, typically with `StepError::Cancelled`.
/// The engine never aborts a running attempt: a handler that ignores the
/// signal keeps going until its own per-attempt timeout.
#[derive(Clone)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
