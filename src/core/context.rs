//! Shared run context: the append-only map every step publishes into.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::error::StepFailure;

/// Reason a step was skipped instead of dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConditionNotMet,
    BudgetExhausted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConditionNotMet => write!(f, "condition_not_met"),
            SkipReason::BudgetExhausted => write!(f, "budget_exhausted"),
        }
    }
}

/// Terminal outcome of a single step.
///
/// Every declared step ends the run with exactly one of these in the
/// context; there is no transient state visible to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed { value: Value },
    Skipped { reason: SkipReason },
    Failed { failure: StepFailure },
    NotRun,
}

impl StepOutcome {
    pub fn completed(value: Value) -> Self {
        StepOutcome::Completed { value }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }

    pub fn is_not_run(&self) -> bool {
        matches!(self, StepOutcome::NotRun)
    }

    /// The produced value, for `Completed` outcomes.
    pub fn value(&self) -> Option<&Value> {
        match self {
            StepOutcome::Completed { value } => Some(value),
            _ => None,
        }
    }

    /// The failure record, for `Failed` outcomes.
    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            StepOutcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            StepOutcome::Skipped { reason } => Some(*reason),
            _ => None,
        }
    }
}

/// Append-only, thread-safe map of step name to terminal outcome, seeded
/// with the initial input at run start.
///
/// Each key is written at most once and the write is a single atomic
/// publish under the lock; readers never observe a partially recorded
/// outcome. The public surface is read-only, the engine alone publishes.
#[derive(Clone, Default)]
pub struct RunContext {
    entries: Arc<RwLock<HashMap<String, StepOutcome>>>,
}

impl RunContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Seeds an initial-input key as a completed entry.
    pub(crate) fn seed(&self, key: impl Into<String>, value: Value) {
        self.publish(key.into(), StepOutcome::completed(value));
    }

    /// Publishes a terminal outcome, absent -> terminal exactly once. A
    /// second write for the same key is an engine invariant violation:
    /// the first outcome is kept.
    pub(crate) fn publish(&self, name: String, outcome: StepOutcome) {
        let mut entries = self.entries.write();
        match entries.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(outcome);
            }
            Entry::Occupied(slot) => {
                error!(step = %slot.key(), "duplicate outcome publish rejected");
                debug_assert!(false, "duplicate outcome publish for '{}'", slot.key());
            }
        }
    }

    /// The recorded outcome for a step or initial-input key.
    pub fn get(&self, name: &str) -> Option<StepOutcome> {
        self.entries.read().get(name).cloned()
    }

    /// The completed value for a key, if it completed.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.entries
            .read()
            .get(name)
            .and_then(|outcome| outcome.value().cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seed_is_visible_as_completed() {
        let context = RunContext::new();
        context.seed("submission", json!({"id": 7}));

        let outcome = context.get("submission").unwrap();
        assert!(outcome.is_completed());
        assert_eq!(context.value("submission").unwrap(), json!({"id": 7}));
    }

    #[test]
    fn test_publish_is_write_once() {
        let context = RunContext::new();
        context.publish("step".into(), StepOutcome::completed(json!(1)));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            context.publish("step".into(), StepOutcome::NotRun);
        }));
        // Debug builds assert; either way the first write survives.
        let _ = result;
        assert_eq!(context.value("step").unwrap(), json!(1));
    }

    #[test]
    fn test_reads_are_shared_across_clones() {
        let context = RunContext::new();
        let reader = context.clone();
        context.publish("a".into(), StepOutcome::NotRun);

        assert!(reader.contains("a"));
        assert_eq!(reader.len(), 1);
        assert!(reader.get("a").unwrap().is_not_run());
    }

    #[test]
    fn test_outcome_accessors() {
        let completed = StepOutcome::completed(json!("x"));
        assert_eq!(completed.value(), Some(&json!("x")));
        assert!(completed.failure().is_none());

        let skipped = StepOutcome::Skipped {
            reason: SkipReason::BudgetExhausted,
        };
        assert_eq!(skipped.skip_reason(), Some(SkipReason::BudgetExhausted));
        assert!(!skipped.is_completed());
    }

    #[test]
    fn test_skip_reason_serializes_snake_case() {
        let outcome = StepOutcome::Skipped {
            reason: SkipReason::BudgetExhausted,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "budget_exhausted");
        assert_eq!(SkipReason::BudgetExhausted.to_string(), "budget_exhausted");
    }
}
