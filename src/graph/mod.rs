//! Dependency graphs of resources and instances.
//!
//! A [`Graph`] wraps a petgraph `StableDiGraph`. An edge `a -> b` means
//! `b` depends on `a`, so a topological order is an evaluation order.
//! Graphs are built by running an ordered list of
//! [`GraphTransformer`] passes and then validated: exactly one root,
//! no cycle, every node reachable from the root.

mod builder;
mod expand;
mod node;
mod transform;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::Dfs;
use std::collections::HashSet;

use crate::error::GraphError;

pub use builder::{BasicGraphBuilder, PLAN_GRAPH_NAME, PlanGraphBuilder};
pub use expand::ExpandCount;
pub use node::{GraphNode, InstanceFactory, InstanceNode, OrphanFactory, OrphanNode, ResourceNode};
pub use transform::{
    AttachStateTransformer, ConfigTransformer, GraphTransformer, OrphanResourceCountTransformer,
    ReferenceTransformer, ResourceCountTransformer, RootTransformer, StateOrphanTransformer,
    TargetsTransformer,
};

/// Index of a node within a [`Graph`].
pub type NodeId = NodeIndex;

/// A named dependency graph.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    inner: StableDiGraph<GraphNode, ()>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: StableDiGraph::new(),
        }
    }

    /// Graph name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a node.
    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        self.inner.add_node(node)
    }

    /// Adds the edge `from -> to` (`to` depends on `from`) unless it
    /// already exists. Returns true if an edge was added.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        if self.inner.find_edge(from, to).is_some() {
            return false;
        }
        self.inner.add_edge(from, to, ());
        true
    }

    /// Returns true if `to` directly depends on `from`.
    #[must_use]
    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.inner.find_edge(from, to).is_some()
    }

    /// Removes a node and its edges.
    pub fn remove_node(&mut self, id: NodeId) -> Option<GraphNode> {
        self.inner.remove_node(id)
    }

    /// Returns a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.inner.node_weight(id)
    }

    /// Returns a node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.inner.node_weight_mut(id)
    }

    /// Returns every node index.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner.node_indices().collect()
    }

    /// Iterates over every node.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.inner
            .node_indices()
            .filter_map(|id| self.inner.node_weight(id).map(|n| (id, n)))
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    /// Returns true if the graph has no node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Finds a node by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes().find(|(_, n)| n.name() == name).map(|(id, _)| id)
    }

    /// Nodes `id` depends on.
    #[must_use]
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .neighbors_directed(id, Direction::Incoming)
            .collect()
    }

    /// Nodes depending on `id`.
    #[must_use]
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .neighbors_directed(id, Direction::Outgoing)
            .collect()
    }

    /// Every node `id` transitively depends on, excluding `id`.
    #[must_use]
    pub fn ancestors(&self, id: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for dep in self.inner.neighbors_directed(current, Direction::Incoming) {
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        seen.remove(&id);
        seen
    }

    /// Indices of the root nodes.
    #[must_use]
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.is_root())
            .map(|(id, _)| id)
            .collect()
    }

    /// Sorted names of every node.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes().map(|(_, n)| n.name()).collect();
        names.sort();
        names
    }

    /// Checks the graph is walkable.
    ///
    /// # Errors
    ///
    /// Returns an error if there is not exactly one root, if there is a
    /// cycle, or if a node cannot be reached from the root.
    pub fn validate(&self) -> Result<(), GraphError> {
        let roots = self.roots();
        let root = match roots.as_slice() {
            [root] => *root,
            [] => {
                return Err(GraphError::NoRoot {
                    graph: self.name.clone(),
                });
            }
            _ => {
                return Err(GraphError::MultipleRoots {
                    graph: self.name.clone(),
                    count: roots.len(),
                });
            }
        };

        if let Err(cycle) = toposort(&self.inner, None) {
            let node = self
                .node(cycle.node_id())
                .map_or_else(|| String::from("?"), GraphNode::name);
            return Err(GraphError::CycleDetected {
                graph: self.name.clone(),
                node,
            });
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&self.inner, root);
        while let Some(id) = dfs.next(&self.inner) {
            reached.insert(id);
        }
        if let Some((_, node)) = self.nodes().find(|(id, _)| !reached.contains(id)) {
            return Err(GraphError::Unreachable {
                graph: self.name.clone(),
                node: node.name(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ResourceAddress;
    use crate::config::ResourceConfig;
    use std::sync::Arc;

    fn resource(name: &str) -> GraphNode {
        GraphNode::Resource(ResourceNode::new(
            ResourceAddress::managed("aws_instance", name),
            Arc::new(ResourceConfig::managed("aws_instance", name)),
        ))
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(resource("a"));
        let b = graph.add_node(resource("b"));
        assert!(graph.add_edge(a, b));
        assert!(!graph.add_edge(a, b));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.dependencies(b), vec![a]);
        assert_eq!(graph.dependents(a), vec![b]);
    }

    #[test]
    fn test_validate_requires_single_root() {
        let mut graph = Graph::new("test");
        graph.add_node(resource("a"));
        assert!(matches!(graph.validate(), Err(GraphError::NoRoot { .. })));

        graph.add_node(GraphNode::Root);
        graph.add_node(GraphNode::Root);
        assert!(matches!(
            graph.validate(),
            Err(GraphError::MultipleRoots { count: 2, .. })
        ));
    }

    #[test]
    fn test_validate_detects_cycle() {
        let mut graph = Graph::new("test");
        let root = graph.add_node(GraphNode::Root);
        let a = graph.add_node(resource("a"));
        let b = graph.add_node(resource("b"));
        graph.add_edge(root, a);
        graph.add_edge(a, b);
        graph.add_edge(b, a);
        assert!(matches!(
            graph.validate(),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_validate_detects_unreachable() {
        let mut graph = Graph::new("test");
        let root = graph.add_node(GraphNode::Root);
        let a = graph.add_node(resource("a"));
        graph.add_node(resource("b"));
        graph.add_edge(root, a);
        match graph.validate() {
            Err(GraphError::Unreachable { node, .. }) => assert_eq!(node, "aws_instance.b"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_ancestors() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(resource("a"));
        let b = graph.add_node(resource("b"));
        let c = graph.add_node(resource("c"));
        graph.add_edge(a, b);
        graph.add_edge(b, c);
        let ancestors = graph.ancestors(c);
        assert_eq!(ancestors.len(), 2);
        assert!(ancestors.contains(&a) && ancestors.contains(&b));
    }
}
