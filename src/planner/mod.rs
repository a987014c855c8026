//! Planning.
//!
//! This module turns a configuration and the recorded state into a plan:
//! - Diff types recorded by instance pipelines
//! - The concurrent graph walker
//! - Plan summaries and the planner tying everything together

pub mod diff;
mod engine;
mod plan;
mod walker;

pub use diff::{AttributeDiff, DiffType, InstanceDiff, ModuleDiff, PlanDiff, SharedDiff};
pub use engine::{PlanReport, Planner};
pub use plan::{Plan, PlanSummary, PlannedChange};
pub use walker::{GraphWalker, NodeReport, NodeStatus, WalkReport};
