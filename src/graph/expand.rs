//! Dynamic count expansion of resource nodes.
//!
//! Expansion happens while the graph is walked, not when it is built,
//! because a count may depend on values only known once other resources
//! have been evaluated. The state lock is held (upgradable) for the whole
//! call so count evaluation, key renames and orphan detection all see one
//! consistent snapshot.

use parking_lot::{RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::diagnostics::Diagnostics;
use crate::error::{CountError, InfraplanError};
use crate::eval::{CountValue, EvalContext};

use super::Graph;
use super::builder::BasicGraphBuilder;
use super::node::ResourceNode;
use super::transform::{
    AttachStateTransformer, GraphTransformer, OrphanResourceCountTransformer,
    ReferenceTransformer, ResourceCountTransformer, RootTransformer, TargetsTransformer,
};

/// Instance count of a resource being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandCount {
    /// No count declared; one instance without an index.
    Single,
    /// Declared count with a known value.
    Known(usize),
    /// Declared count whose value is not known yet.
    Unknown,
}

impl ResourceNode {
    /// Expands this resource into a validated sub-graph of instance and
    /// orphan nodes.
    ///
    /// # Errors
    ///
    /// Returns the collected diagnostics if the count cannot be evaluated,
    /// is negative, or the sub-graph does not validate. Nothing is returned
    /// alongside an error.
    pub fn dynamic_expand(&self, ctx: &EvalContext) -> Result<Graph, Diagnostics> {
        let mut diags = Diagnostics::new();
        let state = ctx.state.upgradable_read();

        let count = match &self.config.count {
            None => ExpandCount::Single,
            Some(expr) => {
                let (value, count_diags) = ctx.count_evaluator.evaluate(expr, &self.address, &state);
                let count_error = |message: String| -> InfraplanError {
                    CountError::Evaluation {
                        resource: self.address.to_string(),
                        module: self.address.module.to_string(),
                        expression: expr.to_string(),
                        message,
                    }
                    .into()
                };

                if count_diags.has_errors() {
                    let message = count_diags
                        .errors()
                        .map(|d| d.summary.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    for warning in count_diags.warnings() {
                        diags.append(warning.clone());
                    }
                    diags.append(count_error(message));
                    return Err(diags);
                }
                diags.extend(count_diags);

                match value {
                    CountValue::Unknown => ExpandCount::Unknown,
                    CountValue::Known(n) => match usize::try_from(n) {
                        Ok(n) => ExpandCount::Known(n),
                        Err(_) => {
                            diags.append(InfraplanError::from(CountError::Negative {
                                resource: self.address.to_string(),
                                module: self.address.module.to_string(),
                                expression: expr.to_string(),
                                value: n,
                            }));
                            return Err(diags);
                        }
                    },
                }
            }
        };
        debug!(resource = %self.address, count = ?count, "Evaluated count");

        let count_enabled = self.config.count.is_some();
        let state = if state.count_transition(&self.address, count_enabled).is_some() {
            let mut write = RwLockUpgradableReadGuard::upgrade(state);
            if write.fix_count_transition(&self.address, count_enabled) {
                info!(
                    resource = %self.address,
                    count_enabled,
                    "Renamed state entry for count transition"
                );
            }
            RwLockWriteGuard::downgrade_to_upgradable(write)
        } else {
            state
        };

        let steps: Vec<Box<dyn GraphTransformer + '_>> = vec![
            Box::new(ResourceCountTransformer::new(
                &self.address,
                count,
                self.instance_factory(),
            )),
            Box::new(OrphanResourceCountTransformer::new(
                &self.address,
                count,
                &state,
                self.orphan_factory(),
            )),
            Box::new(AttachStateTransformer::new(&state)),
            Box::new(TargetsTransformer::new(&self.targets)),
            Box::new(ReferenceTransformer::new()),
            Box::new(RootTransformer::new()),
        ];

        match BasicGraphBuilder::new(format!("{} (expanded)", self.address), steps).build() {
            Ok(graph) => {
                debug!(resource = %self.address, nodes = graph.len(), "Expanded resource");
                Ok(graph)
            }
            Err(err) => {
                diags.append(err);
                Err(diags)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, ResourceAddress, StateKey};
    use crate::config::ResourceConfig;
    use crate::eval::{MockCountEvaluator, StateResolver};
    use crate::graph::GraphNode;
    use crate::state::{InstanceState, ResourceState, State};
    use crate::testing::{SpyProvider, eval_context_with_count, fixed_count};
    use serde_json::json;
    use std::sync::Arc;

    fn entry(id: &str) -> ResourceState {
        ResourceState {
            resource_type: String::from("aws_instance"),
            provider: String::from("aws"),
            dependencies: Vec::new(),
            primary: Some(InstanceState::new(id)),
        }
    }

    fn state_with(keys: &[&str]) -> State {
        let mut state = State::new();
        for key in keys {
            state.set(&ModulePath::root(), StateKey::from_raw(*key), entry(key));
        }
        state
    }

    fn node(config: ResourceConfig) -> ResourceNode {
        ResourceNode::new(config.address(&ModulePath::root()), Arc::new(config))
    }

    fn expand(node: &ResourceNode, state: State, count: CountValue) -> (Result<Graph, Diagnostics>, State) {
        let ctx = eval_context_with_count(
            state,
            Arc::new(SpyProvider::new()),
            Arc::new(fixed_count(count)),
        );
        let result = node.dynamic_expand(&ctx);
        let state = ctx.state.read().clone();
        (result, state)
    }

    fn instances(graph: &Graph) -> Vec<String> {
        let mut names: Vec<String> = graph
            .nodes()
            .filter(|(_, n)| matches!(n, GraphNode::Instance(_)))
            .map(|(_, n)| n.name())
            .collect();
        names.sort();
        names
    }

    fn orphans(graph: &Graph) -> Vec<String> {
        let mut names: Vec<String> = graph
            .nodes()
            .filter(|(_, n)| matches!(n, GraphNode::Orphan(_)))
            .map(|(_, n)| n.name())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_expand_without_count() {
        let node = node(ResourceConfig::managed("aws_instance", "web"));
        let (graph, _) = expand(&node, State::new(), CountValue::Known(0));
        let graph = graph.unwrap();
        assert_eq!(instances(&graph), vec!["aws_instance.web"]);
        assert!(orphans(&graph).is_empty());
    }

    #[test]
    fn test_expand_reuses_existing_state() {
        let node = node(ResourceConfig::managed("aws_instance", "web").with_count("2"));
        let (graph, _) = expand(
            &node,
            state_with(&["aws_instance.web.0"]),
            CountValue::Known(2),
        );
        let graph = graph.unwrap();
        assert_eq!(
            instances(&graph),
            vec!["aws_instance.web[0]", "aws_instance.web[1]"]
        );
        assert!(orphans(&graph).is_empty());

        let first = graph.find("aws_instance.web[0]").unwrap();
        let second = graph.find("aws_instance.web[1]").unwrap();
        let Some(GraphNode::Instance(first)) = graph.node(first) else {
            panic!("expected instance");
        };
        let Some(GraphNode::Instance(second)) = graph.node(second) else {
            panic!("expected instance");
        };
        assert!(first.state.is_some());
        assert!(second.state.is_none());
        assert_eq!(first.provider, "aws");
        assert!(Arc::ptr_eq(&first.config, &node.config));
    }

    #[test]
    fn test_expand_shrinking_count_yields_orphans() {
        let node = node(ResourceConfig::managed("aws_instance", "web").with_count("2"));
        let (graph, _) = expand(
            &node,
            state_with(&[
                "aws_instance.web.0",
                "aws_instance.web.1",
                "aws_instance.web.2",
                "aws_instance.web.3",
                "aws_instance.web.10",
            ]),
            CountValue::Known(2),
        );
        let graph = graph.unwrap();
        assert_eq!(
            orphans(&graph),
            vec![
                "aws_instance.web[10] (orphan)",
                "aws_instance.web[2] (orphan)",
                "aws_instance.web[3] (orphan)",
            ]
        );
        for (_, n) in graph.nodes() {
            if let GraphNode::Orphan(orphan) = n {
                assert!(orphan.state.is_some());
            }
        }
    }

    #[test]
    fn test_expand_renames_on_count_transition() {
        let node = node(ResourceConfig::managed("aws_instance", "foo").with_count("3"));
        let (graph, state) = expand(&node, state_with(&["aws_instance.foo"]), CountValue::Known(3));
        let graph = graph.unwrap();

        let root = ModulePath::root();
        assert!(state.get(&root, &StateKey::from_raw("aws_instance.foo")).is_none());
        let moved = state
            .instance(&root, &StateKey::from_raw("aws_instance.foo.0"))
            .unwrap();
        assert_eq!(moved.id, "aws_instance.foo");
        assert!(orphans(&graph).is_empty());

        let id = graph.find("aws_instance.foo[0]").unwrap();
        let Some(GraphNode::Instance(first)) = graph.node(id) else {
            panic!("expected instance");
        };
        assert_eq!(first.state.as_ref().and_then(|s| s.primary.as_ref()), Some(moved));
    }

    #[test]
    fn test_expand_renames_when_count_removed() {
        let node = node(ResourceConfig::managed("aws_instance", "foo"));
        let (graph, state) = expand(
            &node,
            state_with(&["aws_instance.foo.0", "aws_instance.foo.1"]),
            CountValue::Known(0),
        );
        let graph = graph.unwrap();
        assert!(state.get(&ModulePath::root(), &StateKey::from_raw("aws_instance.foo")).is_some());
        assert_eq!(instances(&graph), vec!["aws_instance.foo"]);
        assert_eq!(orphans(&graph), vec!["aws_instance.foo[1] (orphan)"]);
    }

    #[test]
    fn test_expand_unknown_count() {
        let node = node(ResourceConfig::managed("aws_instance", "web").with_count("${var.n}"));
        let (graph, _) = expand(
            &node,
            state_with(&["aws_instance.web.0", "aws_instance.web.5"]),
            CountValue::Unknown,
        );
        let graph = graph.unwrap();
        assert!(graph.validate().is_ok());
        assert_eq!(instances(&graph), vec!["aws_instance.web[0]"]);
        assert!(orphans(&graph).is_empty());

        let id = graph.find("aws_instance.web[0]").unwrap();
        let Some(GraphNode::Instance(placeholder)) = graph.node(id) else {
            panic!("expected instance");
        };
        assert!(placeholder.placeholder);
    }

    #[test]
    fn test_expand_negative_count() {
        let node = node(ResourceConfig::managed("aws_instance", "web").with_count("-1"));
        let (result, _) = expand(&node, State::new(), CountValue::Known(-1));
        let diags = result.unwrap_err();
        assert!(diags.has_errors());
        let message = diags.errors().next().unwrap().summary.clone();
        assert!(message.contains("-1"));
        assert!(message.contains("aws_instance.web"));
        assert!(message.contains("module root"));
    }

    #[test]
    fn test_expand_count_evaluation_error() {
        let node = node(ResourceConfig::managed("aws_instance", "web").with_count("${var.missing}"));
        let ctx = eval_context_with_count(
            state_with(&["aws_instance.web"]),
            Arc::new(SpyProvider::new()),
            Arc::new(StateResolver::new()),
        );
        let diags = node.dynamic_expand(&ctx).unwrap_err();
        let message = diags.errors().last().unwrap().summary.clone();
        assert!(message.contains("${var.missing}"));
        assert!(message.contains("unknown variable"));
        // nothing renamed when expansion fails
        let state = ctx.state.read();
        assert!(state.get(&ModulePath::root(), &StateKey::from_raw("aws_instance.web")).is_some());
    }

    #[test]
    fn test_expand_count_from_variable() {
        let node = node(ResourceConfig::managed("aws_instance", "web").with_count("${var.n}"));
        let ctx = eval_context_with_count(
            State::new(),
            Arc::new(SpyProvider::new()),
            Arc::new(StateResolver::new().with_variable("n", "3")),
        );
        let graph = node.dynamic_expand(&ctx).unwrap();
        assert_eq!(instances(&graph).len(), 3);
    }

    #[test]
    fn test_expand_respects_targets() {
        let mut node = node(ResourceConfig::managed("aws_instance", "web").with_count("3"));
        node.targets = vec![ResourceAddress::managed("aws_instance", "web").instance(1)];
        let (graph, _) = expand(&node, State::new(), CountValue::Known(3));
        assert_eq!(instances(&graph.unwrap()), vec!["aws_instance.web[1]"]);
    }

    #[test]
    fn test_expand_evaluates_count_once() {
        let node = node(
            ResourceConfig::managed("aws_instance", "web")
                .with_count("2")
                .with_attr("ami", json!("ami-1")),
        );
        let mut mock = MockCountEvaluator::new();
        mock.expect_evaluate()
            .times(1)
            .returning(|_, _, _| (CountValue::Known(2), Diagnostics::new()));
        let ctx = eval_context_with_count(State::new(), Arc::new(SpyProvider::new()), Arc::new(mock));
        assert!(node.dynamic_expand(&ctx).is_ok());
    }
}
