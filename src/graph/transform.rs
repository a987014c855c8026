//! Graph transformer passes.
//!
//! Every pass takes a graph and returns the transformed graph. Passes only
//! look at the nodes and edges they are handed, never at which passes ran
//! before them, and running a pass twice leaves the graph unchanged.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::addrs::{ModulePath, ResourceAddress};
use crate::config::Config;
use crate::error::{GraphError, Result};
use crate::state::State;

use super::expand::ExpandCount;
use super::node::{GraphNode, InstanceFactory, OrphanFactory, OrphanNode, ResourceNode};
use super::{Graph, NodeId};

/// A single graph-building pass.
pub trait GraphTransformer {
    /// Transforms `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be transformed.
    fn transform(&self, graph: Graph) -> Result<Graph>;
}

/// Adds one resource node per declaration.
#[derive(Debug)]
pub struct ConfigTransformer<'a> {
    config: &'a Config,
}

impl<'a> ConfigTransformer<'a> {
    /// Creates the pass.
    #[must_use]
    pub const fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl GraphTransformer for ConfigTransformer<'_> {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        for (path, resource) in self.config.resources() {
            let address = resource.address(path);
            if graph.find(&address.to_string()).is_some() {
                continue;
            }
            let node = ResourceNode::new(address, Arc::new(resource.clone()));
            graph.add_node(GraphNode::Resource(node));
        }
        Ok(graph)
    }
}

/// Adds an orphan node for every recorded instance whose resource is no
/// longer declared.
#[derive(Debug)]
pub struct StateOrphanTransformer<'a> {
    config: &'a Config,
    state: &'a State,
}

impl<'a> StateOrphanTransformer<'a> {
    /// Creates the pass.
    #[must_use]
    pub const fn new(config: &'a Config, state: &'a State) -> Self {
        Self { config, state }
    }
}

impl GraphTransformer for StateOrphanTransformer<'_> {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        let declared: HashSet<ResourceAddress> = self
            .config
            .resources()
            .map(|(path, r)| r.address(path))
            .collect();

        for module in &self.state.modules {
            for (key, entry) in &module.resources {
                let address = match key.to_address(&module.path) {
                    Ok(address) => address,
                    Err(err) => {
                        warn!(module = %module.path, "Skipping state entry: {err}");
                        continue;
                    }
                };
                if declared.contains(&address.containing_resource()) {
                    continue;
                }
                let node = OrphanNode {
                    provider: if entry.provider.is_empty() {
                        default_provider(&address.resource_type)
                    } else {
                        entry.provider.clone()
                    },
                    address,
                    config: None,
                    state: None,
                };
                let node = GraphNode::Orphan(node);
                if graph.find(&node.name()).is_none() {
                    debug!(node = %node, "Adding orphan of removed resource");
                    graph.add_node(node);
                }
            }
        }
        Ok(graph)
    }
}

fn default_provider(resource_type: &str) -> String {
    resource_type
        .split_once('_')
        .map_or(resource_type, |(prefix, _)| prefix)
        .to_string()
}

/// Adds one instance node per index of an expanded resource.
pub struct ResourceCountTransformer<'a> {
    resource: &'a ResourceAddress,
    count: ExpandCount,
    factory: InstanceFactory<'a>,
}

impl<'a> ResourceCountTransformer<'a> {
    /// Creates the pass.
    #[must_use]
    pub fn new(resource: &'a ResourceAddress, count: ExpandCount, factory: InstanceFactory<'a>) -> Self {
        Self {
            resource,
            count,
            factory,
        }
    }
}

impl GraphTransformer for ResourceCountTransformer<'_> {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        let resource = self.resource.containing_resource();
        let nodes = match self.count {
            ExpandCount::Single => vec![(self.factory)(resource)],
            ExpandCount::Known(n) => (0..n).map(|i| (self.factory)(resource.instance(i))).collect(),
            ExpandCount::Unknown => {
                let mut node = (self.factory)(resource.instance(0));
                node.placeholder = true;
                vec![node]
            }
        };

        for node in nodes {
            let node = GraphNode::Instance(node);
            if graph.find(&node.name()).is_none() {
                graph.add_node(node);
            }
        }
        Ok(graph)
    }
}

/// Adds an orphan node for every recorded instance outside the count.
pub struct OrphanResourceCountTransformer<'a> {
    resource: &'a ResourceAddress,
    count: ExpandCount,
    state: &'a State,
    factory: OrphanFactory<'a>,
}

impl<'a> OrphanResourceCountTransformer<'a> {
    /// Creates the pass.
    #[must_use]
    pub fn new(
        resource: &'a ResourceAddress,
        count: ExpandCount,
        state: &'a State,
        factory: OrphanFactory<'a>,
    ) -> Self {
        Self {
            resource,
            count,
            state,
            factory,
        }
    }

    /// Recorded instances not covered by the count, ordered by index.
    #[must_use]
    pub fn orphans(&self) -> Vec<ResourceAddress> {
        let mut orphans: Vec<ResourceAddress> = self
            .state
            .resource_instances(self.resource)
            .into_iter()
            .map(|(_, address)| address)
            .filter(|address| match (self.count, address.index) {
                (ExpandCount::Unknown, _) => false,
                (ExpandCount::Single, index) => index.is_some(),
                (ExpandCount::Known(_), None) => true,
                (ExpandCount::Known(n), Some(index)) => index >= n,
            })
            .collect();
        orphans.sort_by_key(|a| a.index);
        orphans
    }
}

impl GraphTransformer for OrphanResourceCountTransformer<'_> {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        for address in self.orphans() {
            let node = GraphNode::Orphan((self.factory)(address));
            if graph.find(&node.name()).is_none() {
                debug!(node = %node, "Adding orphan outside count");
                graph.add_node(node);
            }
        }
        Ok(graph)
    }
}

/// Attaches recorded state to instance and orphan nodes.
#[derive(Debug)]
pub struct AttachStateTransformer<'a> {
    state: &'a State,
}

impl<'a> AttachStateTransformer<'a> {
    /// Creates the pass.
    #[must_use]
    pub const fn new(state: &'a State) -> Self {
        Self { state }
    }
}

impl GraphTransformer for AttachStateTransformer<'_> {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        for id in graph.node_ids() {
            let Some(node) = graph.node_mut(id) else {
                continue;
            };
            let (address, slot) = match node {
                GraphNode::Instance(n) => (&n.address, &mut n.state),
                GraphNode::Orphan(n) => (&n.address, &mut n.state),
                GraphNode::Root | GraphNode::Resource(_) => continue,
            };
            *slot = self.state.get(&address.module, &address.state_key()).cloned();
        }
        Ok(graph)
    }
}

/// Restricts the graph to targeted nodes and everything they depend on.
///
/// Resource nodes are targeted by any target naming the resource and
/// remember which targets selected them; instance and orphan nodes must
/// match a target's index when it has one. No targets means no filtering.
#[derive(Debug)]
pub struct TargetsTransformer<'a> {
    targets: &'a [ResourceAddress],
}

impl<'a> TargetsTransformer<'a> {
    /// Creates the pass.
    #[must_use]
    pub const fn new(targets: &'a [ResourceAddress]) -> Self {
        Self { targets }
    }

    fn matching(&self, node: &GraphNode) -> Vec<ResourceAddress> {
        let Some(address) = node.address() else {
            return Vec::new();
        };
        let whole_resource = matches!(node, GraphNode::Resource(_));
        self.targets
            .iter()
            .filter(|t| {
                if whole_resource {
                    address.same_resource(t)
                } else {
                    address.matches_target(t)
                }
            })
            .cloned()
            .collect()
    }
}

impl GraphTransformer for TargetsTransformer<'_> {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        if self.targets.is_empty() {
            return Ok(graph);
        }

        let mut keep: HashSet<NodeId> = HashSet::new();
        let mut selected: BTreeMap<NodeId, Vec<ResourceAddress>> = BTreeMap::new();
        for (id, node) in graph.nodes() {
            if node.is_root() {
                keep.insert(id);
                continue;
            }
            let matching = self.matching(node);
            if !matching.is_empty() {
                keep.insert(id);
                keep.extend(graph.ancestors(id));
                selected.insert(id, matching);
            }
        }

        for id in graph.node_ids() {
            if !keep.contains(&id) {
                if let Some(node) = graph.remove_node(id) {
                    debug!(node = %node, "Excluded by targets");
                }
                continue;
            }
            if let Some(GraphNode::Resource(n)) = graph.node_mut(id) {
                n.targets = selected.remove(&id).unwrap_or_default();
            }
        }
        Ok(graph)
    }
}

/// Adds dependency edges for references between nodes.
///
/// A reference to `type.name.N` prefers the node exposing exactly that
/// name and otherwise falls back to every node named `type.name`.
#[derive(Debug, Default)]
pub struct ReferenceTransformer;

impl ReferenceTransformer {
    /// Creates the pass.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Rewrites `type.name[N]` into the `type.name.N` form.
fn normalize_reference(reference: &str) -> String {
    reference.replace('[', ".").replace(']', "")
}

/// Strips a trailing `.N` index.
fn without_index(reference: &str) -> Option<&str> {
    let (base, last) = reference.rsplit_once('.')?;
    last.parse::<usize>().is_ok().then_some(base)
}

impl GraphTransformer for ReferenceTransformer {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        let mut by_name: BTreeMap<(ModulePath, String), Vec<NodeId>> = BTreeMap::new();
        for (id, node) in graph.nodes() {
            let Some(address) = node.address() else {
                continue;
            };
            for name in node.referenceable_names() {
                by_name
                    .entry((address.module.clone(), name))
                    .or_default()
                    .push(id);
            }
        }

        let mut edges = Vec::new();
        for (id, node) in graph.nodes() {
            let Some(address) = node.address() else {
                continue;
            };
            let module = &address.module;
            for reference in node.references() {
                let reference = normalize_reference(&reference);
                let lookup = |name: &str| by_name.get(&(module.clone(), name.to_string()));
                let targets = lookup(&reference)
                    .or_else(|| without_index(&reference).and_then(lookup))
                    .cloned()
                    .unwrap_or_default();

                for target in targets {
                    if target != id {
                        edges.push((target, id));
                    } else if matches!(node, GraphNode::Resource(_)) {
                        return Err(GraphError::SelfReference {
                            graph: graph.name().to_string(),
                            node: node.name(),
                        }
                        .into());
                    }
                }
            }
        }

        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        Ok(graph)
    }
}

/// Ensures a single root pointing at every node without dependencies.
#[derive(Debug, Default)]
pub struct RootTransformer;

impl RootTransformer {
    /// Creates the pass.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl GraphTransformer for RootTransformer {
    fn transform(&self, mut graph: Graph) -> Result<Graph> {
        let root = match graph.roots().first() {
            Some(root) => *root,
            None => graph.add_node(GraphNode::Root),
        };
        for id in graph.node_ids() {
            if id != root && graph.dependencies(id).is_empty() {
                graph.add_edge(root, id);
            }
        }
        Ok(graph)
    }
}
