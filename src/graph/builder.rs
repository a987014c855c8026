//! Graph builders composing transformer passes.

use tracing::debug;

use crate::addrs::ResourceAddress;
use crate::config::Config;
use crate::error::Result;
use crate::state::State;

use super::Graph;
use super::transform::{
    AttachStateTransformer, ConfigTransformer, GraphTransformer, ReferenceTransformer,
    RootTransformer, StateOrphanTransformer, TargetsTransformer,
};

/// Name of the top-level plan graph.
pub const PLAN_GRAPH_NAME: &str = "PlanGraph";

/// Runs a list of passes in order and optionally validates the result.
pub struct BasicGraphBuilder<'a> {
    name: String,
    steps: Vec<Box<dyn GraphTransformer + 'a>>,
    validate: bool,
}

impl<'a> BasicGraphBuilder<'a> {
    /// Creates a builder that validates its result.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Box<dyn GraphTransformer + 'a>>) -> Self {
        Self {
            name: name.into(),
            steps,
            validate: true,
        }
    }

    /// Enables or disables validation of the built graph.
    #[must_use]
    pub const fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns the first pass error, or the validation error. No graph is
    /// returned in either case.
    pub fn build(self) -> Result<Graph> {
        let mut graph = Graph::new(self.name);
        for step in &self.steps {
            graph = step.transform(graph)?;
        }
        if self.validate {
            graph.validate()?;
        }
        debug!(
            graph = graph.name(),
            nodes = graph.len(),
            edges = graph.edge_count(),
            "Built graph"
        );
        Ok(graph)
    }
}

/// Builds the top-level graph of a planning run.
#[derive(Debug)]
pub struct PlanGraphBuilder<'a> {
    config: &'a Config,
    state: &'a State,
    targets: &'a [ResourceAddress],
}

impl<'a> PlanGraphBuilder<'a> {
    /// Creates the builder.
    #[must_use]
    pub const fn new(config: &'a Config, state: &'a State, targets: &'a [ResourceAddress]) -> Self {
        Self {
            config,
            state,
            targets,
        }
    }

    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if references form a cycle or a resource
    /// references itself.
    pub fn build(&self) -> Result<Graph> {
        let steps: Vec<Box<dyn GraphTransformer + 'a>> = vec![
            Box::new(ConfigTransformer::new(self.config)),
            Box::new(StateOrphanTransformer::new(self.config, self.state)),
            Box::new(AttachStateTransformer::new(self.state)),
            Box::new(ReferenceTransformer::new()),
            Box::new(TargetsTransformer::new(self.targets)),
            Box::new(RootTransformer::new()),
        ];
        BasicGraphBuilder::new(PLAN_GRAPH_NAME, steps).build()
    }
}
