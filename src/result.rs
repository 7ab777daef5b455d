//! The structured record a run resolves to. Callers persist this
//! themselves; the engine keeps nothing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::StepOutcome;
use crate::error::StepFailure;

/// Terminal status of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step is terminal and no non-emit step failed.
    Completed,
    /// Carries the first fatal step failure; sibling branches still ran.
    Failed { step: String, failure: StepFailure },
    /// The run deadline elapsed before every step could finish.
    TimedOut,
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, RunStatus::TimedOut)
    }
}

/// Full record of one run: a terminal outcome per declared step, overall
/// status and wall-clock timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: String,
    pub workflow: String,
    pub status: RunStatus,
    pub outcomes: HashMap<String, StepOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowResult {
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.outcomes.get(step)
    }

    /// Completed value of a step, if it completed.
    pub fn value(&self, step: &str) -> Option<&Value> {
        self.outcomes.get(step).and_then(StepOutcome::value)
    }
}
