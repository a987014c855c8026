//! Instance evaluation.
//!
//! This module holds everything needed to evaluate one instance:
//! - Resolving raw configuration and count expressions
//! - The per-walk evaluation context shared by every node
//! - The step pipelines that compute and persist diffs

mod context;
mod count;
mod interpolate;
mod pipeline;
mod steps;

pub use context::{EvalContext, WalkOperation};
#[cfg(test)]
pub use count::MockCountEvaluator;
pub use count::{CountEvaluator, CountValue};
pub use interpolate::{InstanceScope, Interpolator, ResolvedConfig, StateResolver, flatten_value};
pub use pipeline::{
    EvalStep, InstancePipeline, PipelineContext, PipelineOutcome, PipelineReport, PipelineSubject,
    Slot, StateSource, StepOutcome,
};
