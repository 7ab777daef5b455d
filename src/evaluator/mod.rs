//! Condition evaluation for gated steps.

pub mod condition;

pub use condition::{evaluate_condition, Condition, ContextPredicate, OutcomePredicate};
