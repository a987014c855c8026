//! State types recording the last-applied view of every instance.
//!
//! State is grouped per module and keyed by [`StateKey`]. All maps are
//! ordered so that serializing the same state twice is byte-identical.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::addrs::{ModulePath, ResourceAddress, StateKey};
use crate::planner::diff::InstanceDiff;

/// Current version of the state format.
pub const STATE_VERSION: u32 = 1;

/// Placeholder stored for attributes whose value is not known until apply.
pub const UNKNOWN_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// State shared between concurrently evaluated nodes.
pub type SharedState = Arc<RwLock<State>>;

/// The complete recorded state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct State {
    /// State format version.
    pub version: u32,
    /// Incremented every time the state is persisted.
    pub serial: u64,
    /// Identifier shared by every serial of one state lineage.
    pub lineage: String,
    /// Module states, ordered by path.
    #[serde(default)]
    pub modules: Vec<ModuleState>,
}

/// Recorded resources of one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleState {
    /// Module path.
    #[serde(default)]
    pub path: ModulePath,
    /// Resources keyed by state key.
    #[serde(default)]
    pub resources: BTreeMap<StateKey, ResourceState>,
}

/// Recorded state of one resource instance entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Provider the entry is bound to.
    #[serde(default)]
    pub provider: String,
    /// Names of the resources this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Primary instance snapshot; `None` when nothing was recorded.
    #[serde(default)]
    pub primary: Option<InstanceState>,
}

/// Last-applied snapshot of one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceState {
    /// Remote identifier; empty when the instance does not exist yet.
    #[serde(default)]
    pub id: String,
    /// Flattened attribute values.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Provider-private metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
    /// Whether the instance is marked for replacement.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tainted: bool,
}

impl InstanceState {
    /// Creates a snapshot with the given remote id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut attributes = BTreeMap::new();
        if !id.is_empty() {
            attributes.insert(String::from("id"), id.clone());
        }
        Self {
            id,
            attributes,
            meta: BTreeMap::new(),
            tainted: false,
        }
    }

    /// Sets one attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Marks the snapshot tainted.
    #[must_use]
    pub const fn tainted(mut self) -> Self {
        self.tainted = true;
        self
    }

    /// Returns true if the remote object exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Applies a diff to a prior snapshot, yielding the planned snapshot.
    ///
    /// Removed attributes are dropped, computed attributes are set to
    /// [`UNKNOWN_VALUE`], everything else takes its new value.
    #[must_use]
    pub fn merge_diff(prior: Option<&Self>, diff: &InstanceDiff) -> Self {
        let mut result = prior.cloned().unwrap_or_default();

        for (key, attr) in &diff.attributes {
            if attr.new_removed {
                result.attributes.remove(key);
            } else if attr.new_computed {
                result.attributes.insert(key.clone(), UNKNOWN_VALUE.to_string());
            } else {
                result.attributes.insert(key.clone(), attr.new.clone());
            }
        }

        if let Some(id) = result.attributes.get("id")
            && id != UNKNOWN_VALUE
        {
            result.id.clone_from(id);
        }

        result
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Creates an empty state with a fresh lineage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            modules: Vec::new(),
        }
    }

    /// Wraps the state for shared access.
    #[must_use]
    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Returns the position of a module in `modules`.
    fn module_index(&self, path: &ModulePath) -> Option<usize> {
        self.modules.iter().position(|m| &m.path == path)
    }

    /// Returns the state of a module, if any.
    #[must_use]
    pub fn module(&self, path: &ModulePath) -> Option<&ModuleState> {
        self.module_index(path).map(|pos| &self.modules[pos])
    }

    /// Returns the state of a module, creating it if needed.
    pub fn module_mut(&mut self, path: &ModulePath) -> &mut ModuleState {
        let pos = match self.module_index(path) {
            Some(pos) => pos,
            None => {
                let pos = self.modules.partition_point(|m| &m.path < path);
                self.modules.insert(
                    pos,
                    ModuleState {
                        path: path.clone(),
                        resources: BTreeMap::new(),
                    },
                );
                pos
            }
        };
        &mut self.modules[pos]
    }

    /// Sorts modules by path and merges modules recorded more than once.
    ///
    /// When a key appears in several copies of a module, the last one wins.
    pub fn normalize(&mut self) {
        let mut merged: BTreeMap<ModulePath, BTreeMap<StateKey, ResourceState>> = BTreeMap::new();
        for module in self.modules.drain(..) {
            merged.entry(module.path).or_default().extend(module.resources);
        }
        self.modules = merged
            .into_iter()
            .map(|(path, resources)| ModuleState { path, resources })
            .collect();
    }

    /// Returns the recorded entry for `key`.
    #[must_use]
    pub fn get(&self, path: &ModulePath, key: &StateKey) -> Option<&ResourceState> {
        self.module(path).and_then(|m| m.resources.get(key))
    }

    /// Returns the primary snapshot recorded under `key`.
    #[must_use]
    pub fn instance(&self, path: &ModulePath, key: &StateKey) -> Option<&InstanceState> {
        self.get(path, key).and_then(|rs| rs.primary.as_ref())
    }

    /// Records an entry under `key`, replacing any previous one.
    pub fn set(&mut self, path: &ModulePath, key: StateKey, resource: ResourceState) {
        debug!(module = %path, key = %key, "Writing state entry");
        self.module_mut(path).resources.insert(key, resource);
    }

    /// Removes the entry under `key`.
    pub fn remove(&mut self, path: &ModulePath, key: &StateKey) -> Option<ResourceState> {
        let removed = self
            .module_index(path)
            .and_then(|pos| self.modules[pos].resources.remove(key));
        if removed.is_some() {
            debug!(module = %path, key = %key, "Removed state entry");
        }
        removed
    }

    /// Moves the entry under `from` to `to` without touching its payload.
    ///
    /// Nothing happens unless `from` exists and `to` does not.
    pub fn rename(&mut self, path: &ModulePath, from: &StateKey, to: &StateKey) -> bool {
        let Some(pos) = self.module_index(path) else {
            return false;
        };
        let module = &mut self.modules[pos];
        if module.resources.contains_key(to) {
            return false;
        }
        let Some(entry) = module.resources.remove(from) else {
            return false;
        };
        module.resources.insert(to.clone(), entry);
        true
    }

    /// Returns the rename needed when a resource starts or stops declaring
    /// a count: `type.name` becomes `type.name.0` and back.
    #[must_use]
    pub fn count_transition(
        &self,
        resource: &ResourceAddress,
        count_enabled: bool,
    ) -> Option<(StateKey, StateKey)> {
        let resource = resource.containing_resource();
        let (from, to) = if count_enabled {
            (resource.state_key(), resource.instance(0).state_key())
        } else {
            (resource.instance(0).state_key(), resource.state_key())
        };

        let module = self.module(&resource.module)?;
        (module.resources.contains_key(&from) && !module.resources.contains_key(&to))
            .then_some((from, to))
    }

    /// Applies [`Self::count_transition`], returning true if a key moved.
    pub fn fix_count_transition(&mut self, resource: &ResourceAddress, count_enabled: bool) -> bool {
        let Some((from, to)) = self.count_transition(resource, count_enabled) else {
            return false;
        };
        debug!(from = %from, to = %to, "Renaming state key for count transition");
        self.rename(&resource.module, &from, &to)
    }

    /// Lists every recorded instance of `resource`, in key order.
    ///
    /// Keys that follow neither supported format are skipped.
    #[must_use]
    pub fn resource_instances(&self, resource: &ResourceAddress) -> Vec<(StateKey, ResourceAddress)> {
        let Some(module) = self.module(&resource.module) else {
            return Vec::new();
        };

        module
            .resources
            .keys()
            .filter_map(|key| match key.to_address(&resource.module) {
                Ok(addr) => addr.same_resource(resource).then(|| (key.clone(), addr)),
                Err(err) => {
                    warn!(module = %resource.module, "Skipping state entry: {err}");
                    None
                }
            })
            .collect()
    }

    /// Returns the total number of recorded entries.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.modules.iter().map(|m| m.resources.len()).sum()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }

    /// Drops modules that no longer hold any entry.
    pub fn prune(&mut self) {
        self.modules.retain(|m| !m.resources.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::diff::AttributeDiff;

    fn entry(id: &str) -> ResourceState {
        ResourceState {
            resource_type: String::from("aws_instance"),
            provider: String::from("aws"),
            dependencies: Vec::new(),
            primary: Some(InstanceState::new(id)),
        }
    }

    #[test]
    fn test_set_get_remove() {
        let root = ModulePath::root();
        let key = StateKey::from_raw("aws_instance.web");
        let mut state = State::new();
        assert!(state.is_empty());

        state.set(&root, key.clone(), entry("i-1"));
        assert_eq!(state.instance(&root, &key).map(|s| s.id.as_str()), Some("i-1"));
        assert!(state.remove(&root, &key).is_some());
        assert!(state.get(&root, &key).is_none());
    }

    #[test]
    fn test_modules_stay_sorted() {
        let mut state = State::new();
        state.set(&ModulePath::new(["b"]), StateKey::from_raw("x.y"), entry("1"));
        state.set(&ModulePath::root(), StateKey::from_raw("x.y"), entry("2"));
        state.set(&ModulePath::new(["a"]), StateKey::from_raw("x.y"), entry("3"));

        let paths: Vec<String> = state.modules.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(paths, vec!["root", "module.a", "module.b"]);
    }

    #[test]
    fn test_unsorted_modules_keep_read_after_write() {
        let net = ModulePath::new(["c"]);
        let key = StateKey::from_raw("aws_instance.web");
        let mut state = State::new();
        state.modules = vec![
            ModuleState {
                path: net.clone(),
                resources: BTreeMap::from([(key.clone(), entry("old"))]),
            },
            ModuleState {
                path: ModulePath::new(["a"]),
                resources: BTreeMap::new(),
            },
            ModuleState {
                path: ModulePath::new(["b"]),
                resources: BTreeMap::new(),
            },
        ];

        state.set(&net, key.clone(), entry("new"));
        assert_eq!(state.instance(&net, &key).map(|s| s.id.as_str()), Some("new"));
        assert_eq!(state.modules.iter().filter(|m| m.path == net).count(), 1);
    }

    #[test]
    fn test_normalize_sorts_and_merges_modules() {
        let net = ModulePath::new(["net"]);
        let mut state = State::new();
        state.modules = vec![
            ModuleState {
                path: net.clone(),
                resources: BTreeMap::from([(StateKey::from_raw("a.a"), entry("1"))]),
            },
            ModuleState {
                path: ModulePath::root(),
                resources: BTreeMap::new(),
            },
            ModuleState {
                path: net.clone(),
                resources: BTreeMap::from([
                    (StateKey::from_raw("a.a"), entry("2")),
                    (StateKey::from_raw("b.b"), entry("3")),
                ]),
            },
        ];

        state.normalize();
        let paths: Vec<String> = state.modules.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(paths, vec!["root", "module.net"]);
        assert_eq!(
            state.instance(&net, &StateKey::from_raw("a.a")).map(|s| s.id.as_str()),
            Some("2")
        );
        assert_eq!(state.module(&net).map(|m| m.resources.len()), Some(2));
    }

    #[test]
    fn test_fix_count_transition_both_directions() {
        let root = ModulePath::root();
        let web = ResourceAddress::managed("aws_instance", "foo");
        let mut state = State::new();
        state.set(&root, web.state_key(), entry("i-1"));

        assert!(state.fix_count_transition(&web, true));
        assert!(state.get(&root, &web.state_key()).is_none());
        assert_eq!(
            state.instance(&root, &web.instance(0).state_key()).map(|s| s.id.as_str()),
            Some("i-1")
        );

        assert!(state.fix_count_transition(&web, false));
        assert_eq!(
            state.instance(&root, &web.state_key()).map(|s| s.id.as_str()),
            Some("i-1")
        );
    }

    #[test]
    fn test_fix_count_transition_never_overwrites() {
        let root = ModulePath::root();
        let web = ResourceAddress::managed("aws_instance", "foo");
        let mut state = State::new();
        state.set(&root, web.state_key(), entry("old"));
        state.set(&root, web.instance(0).state_key(), entry("new"));

        assert!(!state.fix_count_transition(&web, true));
        assert_eq!(
            state.instance(&root, &web.instance(0).state_key()).map(|s| s.id.as_str()),
            Some("new")
        );
    }

    #[test]
    fn test_resource_instances_filters_by_resource() {
        let root = ModulePath::root();
        let web = ResourceAddress::managed("aws_instance", "web");
        let mut state = State::new();
        state.set(&root, web.instance(0).state_key(), entry("a"));
        state.set(&root, web.instance(2).state_key(), entry("b"));
        state.set(&root, StateKey::from_raw("aws_instance.db"), entry("c"));
        state.set(&root, StateKey::from_raw("data.aws_instance.web.0"), entry("d"));
        state.set(&root, StateKey::from_raw("garbage"), entry("e"));

        let found: Vec<Option<usize>> = state
            .resource_instances(&web)
            .into_iter()
            .map(|(_, addr)| addr.index)
            .collect();
        assert_eq!(found, vec![Some(0), Some(2)]);
    }

    #[test]
    fn test_merge_diff() {
        let prior = InstanceState::new("i-1")
            .with_attr("ami", "ami-1")
            .with_attr("old", "gone");

        let mut diff = InstanceDiff::new();
        diff.attributes.insert(String::from("ami"), AttributeDiff::change("ami-1", "ami-2"));
        diff.attributes.insert(String::from("old"), AttributeDiff::removed("gone"));
        diff.attributes.insert(String::from("ip"), AttributeDiff::computed(""));

        let planned = InstanceState::merge_diff(Some(&prior), &diff);
        assert_eq!(planned.id, "i-1");
        assert_eq!(planned.attributes.get("ami").map(String::as_str), Some("ami-2"));
        assert!(!planned.attributes.contains_key("old"));
        assert_eq!(planned.attributes.get("ip").map(String::as_str), Some(UNKNOWN_VALUE));
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let root = ModulePath::root();
        let mut state = State::new();
        state.set(&root, StateKey::from_raw("b.b"), entry("2"));
        state.set(&root, StateKey::from_raw("a.a"), entry("1"));

        let first = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&first).unwrap();
        assert_eq!(back, state);
        assert_eq!(serde_json::to_string(&back).unwrap(), first);
        assert!(first.find("a.a").unwrap() < first.find("b.b").unwrap());
    }

    #[test]
    fn test_prune_drops_empty_modules() {
        let module = ModulePath::new(["net"]);
        let key = StateKey::from_raw("aws_subnet.a");
        let mut state = State::new();
        state.set(&module, key.clone(), entry("s-1"));
        state.remove(&module, &key);
        assert_eq!(state.modules.len(), 1);
        state.prune();
        assert!(state.modules.is_empty());
    }
}
