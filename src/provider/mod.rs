//! Provider facade.
//!
//! Providers validate resolved configuration and compute diffs against
//! real infrastructure. The planning core only talks to them through
//! [`ResourceProvider`]; the transport behind it is out of scope.

mod registry;

use async_trait::async_trait;

use crate::addrs::ResourceAddress;
use crate::diagnostics::Diagnostics;
use crate::error::ProviderError;
use crate::eval::ResolvedConfig;
use crate::planner::diff::InstanceDiff;
use crate::state::InstanceState;

pub use registry::ProviderRegistry;

/// Identity of the instance a provider call is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// State key of the instance.
    pub id: String,
    /// Resource type.
    pub resource_type: String,
    /// Full instance address.
    pub address: ResourceAddress,
}

/// Outcome of a diff call.
#[derive(Debug, Clone, Default)]
pub struct DiffResponse {
    /// Planned changes; `None` means nothing changes.
    pub diff: Option<InstanceDiff>,
    /// Whether every planned value is known.
    pub wholly_known: bool,
    /// Problems reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Capability a provider exposes to the planning core.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Validates resolved configuration for a resource type.
    async fn validate_resource(&self, resource_type: &str, config: &ResolvedConfig) -> Diagnostics;

    /// Computes the diff moving `state` to `config`.
    async fn diff(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        config: &ResolvedConfig,
    ) -> Result<DiffResponse, ProviderError>;

    /// Computes the diff for reading a data source.
    async fn read_data_diff(
        &self,
        info: &InstanceInfo,
        config: &ResolvedConfig,
    ) -> Result<Option<InstanceDiff>, ProviderError>;

    /// Performs the read described by `diff`.
    async fn read_data_apply(
        &self,
        info: &InstanceInfo,
        diff: &InstanceDiff,
    ) -> Result<Option<InstanceState>, ProviderError>;
}

impl std::fmt::Debug for dyn ResourceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResourceProvider")
    }
}

impl InstanceInfo {
    /// Builds the info for an instance address.
    #[must_use]
    pub fn new(address: &ResourceAddress) -> Self {
        Self {
            id: address.state_key().to_string(),
            resource_type: address.resource_type.clone(),
            address: address.clone(),
        }
    }
}

impl DiffResponse {
    /// A fully known response carrying `diff`.
    #[must_use]
    pub fn known(diff: Option<InstanceDiff>) -> Self {
        Self {
            diff,
            wholly_known: true,
            diagnostics: Diagnostics::new(),
        }
    }
}
