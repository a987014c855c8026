// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Infraplan
//!
//! The planning core of a declarative infrastructure tool: given resource
//! declarations and the recorded state of what exists, compute what must
//! be created, updated, replaced, or destroyed.
//!
//! ## Overview
//!
//! - Every declared resource becomes a graph node, wired to the resources
//!   it references
//! - When a resource is reached, its `count` is evaluated and the node is
//!   expanded into one instance per index, plus orphans for recorded
//!   instances beyond the count
//! - Each instance runs a fixed pipeline of steps that resolves its
//!   configuration, asks its provider for a diff, and records the planned
//!   state
//!
//! ## Architecture
//!
//! 1. **Configuration**: [`config::Config`] holds the declarations
//! 2. **State**: [`state::State`] records the last applied view, keyed by
//!    [`addrs::StateKey`]
//! 3. **Graph**: [`graph::PlanGraphBuilder`] builds the dependency graph
//! 4. **Walk**: [`planner::GraphWalker`] evaluates nodes concurrently
//! 5. **Planner**: [`planner::Planner`] ties the run together under the
//!    state lock
//!
//! ## Modules
//!
//! - [`addrs`]: Resource addresses and state keys
//! - [`config`]: Declarations, settings, validation, fingerprints
//! - [`diagnostics`]: Aggregated errors and warnings
//! - [`eval`]: Instance pipelines and their evaluation context
//! - [`graph`]: Dependency graph, transformers, and count expansion
//! - [`planner`]: Diffs, graph walking, and planning runs
//! - [`provider`]: The provider seam
//! - [`state`]: Recorded state and its local backend
//! - [`output`]: Plan rendering
//! - [`logging`]: Subscriber setup
//!
//! ## Example
//!
//! ```yaml
//! state_path: .infraplan/state.json
//! parallelism: 10
//! refresh: true
//! targets:
//!   - aws_instance.web[1]
//! log:
//!   level: info
//!   format: text
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod addrs;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod graph;
pub mod logging;
pub mod output;
pub mod planner;
pub mod provider;
pub mod state;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use addrs::{ModulePath, ResourceAddress, ResourceMode, StateKey};
pub use config::{Config, ConfigHasher, ConfigValidator, PlannerSettings, ResourceConfig, SettingsLoader};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{InfraplanError, Result};
pub use eval::{CountEvaluator, EvalContext, InstancePipeline, Interpolator, StateResolver};
pub use graph::{Graph, GraphNode, PlanGraphBuilder};
pub use logging::{init_logging, try_init_logging};
pub use output::{OutputFormat, OutputFormatter};
pub use planner::{GraphWalker, Plan, PlanDiff, PlanReport, Planner, WalkReport};
pub use provider::{DiffResponse, InstanceInfo, ProviderRegistry, ResourceProvider};
pub use state::{LocalStateStore, State, StateStore};
