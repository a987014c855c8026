//! Graph node variants.

use std::fmt;
use std::sync::Arc;

use crate::addrs::ResourceAddress;
use crate::config::ResourceConfig;
use crate::state::ResourceState;

/// A vertex of a plan graph.
#[derive(Debug, Clone)]
pub enum GraphNode {
    /// Synthetic single entry point.
    Root,
    /// A declared resource, expanded into instances when walked.
    Resource(ResourceNode),
    /// One live instance.
    Instance(InstanceNode),
    /// A recorded instance no longer covered by configuration.
    Orphan(OrphanNode),
}

/// A declared resource before count expansion.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// Resource address without an index.
    pub address: ResourceAddress,
    /// The declaration.
    pub config: Arc<ResourceConfig>,
    /// Provider name resolved for the declaration.
    pub provider: String,
    /// Operator targets that selected this resource; empty when every
    /// instance is wanted.
    pub targets: Vec<ResourceAddress>,
}

/// One instance of a declared resource.
#[derive(Debug, Clone)]
pub struct InstanceNode {
    /// Instance address.
    pub address: ResourceAddress,
    /// Declaration of the owning resource.
    pub config: Arc<ResourceConfig>,
    /// Provider name.
    pub provider: String,
    /// Recorded state, attached by [`super::AttachStateTransformer`].
    pub state: Option<ResourceState>,
    /// Stands in for every instance while the count is unknown.
    pub placeholder: bool,
}

/// A recorded instance that must be destroyed or forgotten.
#[derive(Debug, Clone)]
pub struct OrphanNode {
    /// Instance address.
    pub address: ResourceAddress,
    /// Declaration, when the resource still exists with a smaller count.
    pub config: Option<Arc<ResourceConfig>>,
    /// Provider name.
    pub provider: String,
    /// Recorded state, attached by [`super::AttachStateTransformer`].
    pub state: Option<ResourceState>,
}

/// Builds instance nodes during expansion.
pub type InstanceFactory<'a> = Box<dyn Fn(ResourceAddress) -> InstanceNode + 'a>;

/// Builds orphan nodes during expansion.
pub type OrphanFactory<'a> = Box<dyn Fn(ResourceAddress) -> OrphanNode + 'a>;

impl GraphNode {
    /// Display name, unique within a graph.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Root => String::from("root"),
            Self::Resource(n) => n.address.to_string(),
            Self::Instance(n) => n.address.to_string(),
            Self::Orphan(n) => format!("{} (orphan)", n.address),
        }
    }

    /// Address of the node, if it has one.
    #[must_use]
    pub const fn address(&self) -> Option<&ResourceAddress> {
        match self {
            Self::Root => None,
            Self::Resource(n) => Some(&n.address),
            Self::Instance(n) => Some(&n.address),
            Self::Orphan(n) => Some(&n.address),
        }
    }

    /// Names other nodes may reference this node by, most specific first.
    #[must_use]
    pub fn referenceable_names(&self) -> Vec<String> {
        let Some(address) = self.address() else {
            return Vec::new();
        };
        let base = address.resource_name();
        match address.index {
            Some(index) => vec![format!("{base}.{index}"), base],
            None => vec![base],
        }
    }

    /// Names this node references.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        match self {
            Self::Resource(n) => n.config.references(),
            Self::Instance(n) => n.config.references(),
            Self::Root | Self::Orphan(_) => Vec::new(),
        }
    }

    /// Returns true for the synthetic root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }
}

impl ResourceNode {
    /// Creates the node for a declaration.
    #[must_use]
    pub fn new(address: ResourceAddress, config: Arc<ResourceConfig>) -> Self {
        let provider = config.provider_name();
        Self {
            address,
            config,
            provider,
            targets: Vec::new(),
        }
    }

    /// Factory for this resource's instances, binding its declaration and
    /// provider to every node it builds.
    #[must_use]
    pub fn instance_factory(&self) -> InstanceFactory<'_> {
        Box::new(move |address| InstanceNode {
            address,
            config: Arc::clone(&self.config),
            provider: self.provider.clone(),
            state: None,
            placeholder: false,
        })
    }

    /// Factory for this resource's orphans.
    #[must_use]
    pub fn orphan_factory(&self) -> OrphanFactory<'_> {
        Box::new(move |address| OrphanNode {
            address,
            config: Some(Arc::clone(&self.config)),
            provider: self.provider.clone(),
            state: None,
        })
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
