//! Dependency graph construction.
//!
//! [`build_plan`] turns a list of step specs into an [`ExecutionPlan`]:
//! level-ordered layers over the input-dependency DAG, with duplicate,
//! unknown-input, and cycle validation folded into the same pass.

pub mod builder;

pub use builder::{build_plan, ExecutionPlan};
