//! Shared context of a graph walk.

use std::fmt;
use std::sync::Arc;

use crate::planner::diff::SharedDiff;
use crate::provider::ProviderRegistry;
use crate::state::SharedState;

use super::count::CountEvaluator;
use super::interpolate::Interpolator;

/// Phase a walk runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalkOperation {
    /// Re-read data sources into state.
    Refresh,
    /// Compute diffs.
    Plan,
}

/// Everything a node needs while it is evaluated.
///
/// Cloning is cheap; all collaborators are reference counted.
#[derive(Clone)]
pub struct EvalContext {
    /// Current walk phase.
    pub operation: WalkOperation,
    /// Recorded state, updated as nodes complete.
    pub state: SharedState,
    /// Diffs planned so far.
    pub diff: SharedDiff,
    /// Registered providers.
    pub providers: Arc<ProviderRegistry>,
    /// Configuration resolver.
    pub interpolator: Arc<dyn Interpolator>,
    /// Count expression evaluator.
    pub count_evaluator: Arc<dyn CountEvaluator>,
}

impl EvalContext {
    /// Creates a plan-phase context.
    #[must_use]
    pub fn new(
        state: SharedState,
        diff: SharedDiff,
        providers: Arc<ProviderRegistry>,
        interpolator: Arc<dyn Interpolator>,
        count_evaluator: Arc<dyn CountEvaluator>,
    ) -> Self {
        Self {
            operation: WalkOperation::Plan,
            state,
            diff,
            providers,
            interpolator,
            count_evaluator,
        }
    }

    /// Sets the walk phase.
    #[must_use]
    pub const fn with_operation(mut self, operation: WalkOperation) -> Self {
        self.operation = operation;
        self
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("operation", &self.operation)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for WalkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Refresh => "refresh",
            Self::Plan => "plan",
        };
        write!(f, "{s}")
    }
}
