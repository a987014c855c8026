//! Count expression evaluation.

use crate::addrs::ResourceAddress;
use crate::config::CountExpr;
use crate::diagnostics::Diagnostics;
use crate::state::State;

/// Result of evaluating a count expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountValue {
    /// A concrete number; may still be negative and rejected later.
    Known(i64),
    /// Depends on values that are not known yet.
    Unknown,
}

/// Evaluates count expressions against currently known values.
#[cfg_attr(test, mockall::automock)]
pub trait CountEvaluator: Send + Sync {
    /// Evaluates `expr` declared by `resource`.
    fn evaluate(
        &self,
        expr: &CountExpr,
        resource: &ResourceAddress,
        state: &State,
    ) -> (CountValue, Diagnostics);
}
