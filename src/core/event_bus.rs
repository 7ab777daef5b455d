//! Run-progress events, the engine's instrumentation surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::context::StepOutcome;
use crate::result::RunStatus;

/// Timeline of a run as observed from outside.
#[derive(Clone, Debug, Serialize)]
pub enum EngineEvent {
    RunStarted {
        run_id: String,
        workflow: String,
        at: DateTime<Utc>,
    },
    StepStarted {
        step: String,
        attempt: u32,
        at: DateTime<Utc>,
    },
    StepRetrying {
        step: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
        at: DateTime<Utc>,
    },
    StepFinished {
        step: String,
        outcome: StepOutcome,
        at: DateTime<Utc>,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The step this event concerns, for run-level events `None`.
    pub fn step(&self) -> Option<&str> {
        match self {
            EngineEvent::StepStarted { step, .. }
            | EngineEvent::StepRetrying { step, .. }
            | EngineEvent::StepFinished { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Sending half of an event subscription.
pub type EventSender = mpsc::Sender<EngineEvent>;

/// Receiving half of an event subscription.
pub type EventReceiver = mpsc::Receiver<EngineEvent>;

/// Creates a bounded event channel sized for one run's traffic.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(256)
}

/// Fans events out to an optional subscriber. With no subscriber every
/// emit is a cheap no-op; when the receiver goes away mid-run the emitter
/// deactivates itself instead of erroring the run.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<EventSender>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: EventSender) -> Self {
        Self {
            tx: Some(tx),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            tx: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn emit(&self, event: EngineEvent) {
        if !self.is_active() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                self.active.store(false, Ordering::Relaxed);
            }
        }
    }
}
