//! Instance diffs and the per-run diff store.
//!
//! An [`InstanceDiff`] lists the attribute changes needed to move one
//! instance from its recorded state to its desired configuration. Every
//! planned diff of a run is collected in a [`PlanDiff`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::addrs::{ModulePath, StateKey};

/// Diffs shared between concurrently evaluated nodes.
pub type SharedDiff = Arc<RwLock<PlanDiff>>;

/// Change to a single attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDiff {
    /// Recorded value.
    #[serde(default)]
    pub old: String,
    /// Desired value; meaningless when `new_computed` or `new_removed`.
    #[serde(default)]
    pub new: String,
    /// The new value is only known after apply.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub new_computed: bool,
    /// The attribute is removed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub new_removed: bool,
    /// Changing this attribute forces a new remote object.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_new: bool,
}

/// Attribute-level changes for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceDiff {
    /// Changed attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDiff>,
    /// The existing remote object is destroyed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub destroy: bool,
    /// The existing object is tainted and replaced.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub destroy_tainted: bool,
    /// Whether every planned value is known.
    #[serde(default = "known")]
    pub wholly_known: bool,
}

/// Classified kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Nothing to do.
    NoChange,
    /// A new object is created.
    Create,
    /// The object is updated in place.
    Update,
    /// The object is destroyed and created again.
    Replace,
    /// The object is destroyed.
    Destroy,
}

/// Diffs planned during one run, grouped by module.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanDiff {
    /// Module diffs, ordered by path.
    #[serde(default)]
    pub modules: Vec<ModuleDiff>,
}

/// Planned diffs of one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleDiff {
    /// Module path.
    #[serde(default)]
    pub path: ModulePath,
    /// Diffs keyed by state key.
    #[serde(default)]
    pub resources: BTreeMap<StateKey, InstanceDiff>,
}

const fn known() -> bool {
    true
}

impl AttributeDiff {
    /// A plain value change.
    #[must_use]
    pub fn change(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            ..Self::default()
        }
    }

    /// A value only known after apply.
    #[must_use]
    pub fn computed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_computed: true,
            ..Self::default()
        }
    }

    /// A removed attribute.
    #[must_use]
    pub fn removed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_removed: true,
            ..Self::default()
        }
    }

    /// Marks the change as forcing a new object.
    #[must_use]
    pub const fn forces_new(mut self) -> Self {
        self.requires_new = true;
        self
    }
}

impl Default for InstanceDiff {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceDiff {
    /// Creates an empty diff.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attributes: BTreeMap::new(),
            destroy: false,
            destroy_tainted: false,
            wholly_known: true,
        }
    }

    /// Creates a diff that only destroys.
    #[must_use]
    pub const fn destroy_only() -> Self {
        Self {
            attributes: BTreeMap::new(),
            destroy: true,
            destroy_tainted: false,
            wholly_known: true,
        }
    }

    /// Returns true if the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.destroy && !self.destroy_tainted && self.attributes.is_empty()
    }

    /// Returns true if any attribute change forces a new object.
    #[must_use]
    pub fn requires_new(&self) -> bool {
        self.attributes.values().any(|a| a.requires_new)
    }

    /// Returns true if the diff destroys the current object, either
    /// outright or as part of a replacement.
    #[must_use]
    pub const fn destroys(&self) -> bool {
        self.destroy || self.destroy_tainted
    }

    /// Classifies the diff.
    #[must_use]
    pub fn change_type(&self) -> DiffType {
        if self.is_empty() {
            DiffType::NoChange
        } else if self.requires_new() && self.destroys() {
            DiffType::Replace
        } else if self.destroy {
            DiffType::Destroy
        } else if self.requires_new() {
            DiffType::Create
        } else {
            DiffType::Update
        }
    }
}

impl PlanDiff {
    /// Creates an empty diff store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Wraps the store for shared access.
    #[must_use]
    pub fn into_shared(self) -> SharedDiff {
        Arc::new(RwLock::new(self))
    }

    /// Returns the diff recorded under `key`.
    #[must_use]
    pub fn get(&self, path: &ModulePath, key: &StateKey) -> Option<&InstanceDiff> {
        self.modules
            .iter()
            .find(|m| &m.path == path)
            .and_then(|m| m.resources.get(key))
    }

    /// Records a diff. A missing or empty diff removes the entry instead.
    pub fn set(&mut self, path: &ModulePath, key: StateKey, diff: Option<InstanceDiff>) {
        match diff {
            Some(diff) if !diff.is_empty() => {
                debug!(module = %path, key = %key, change = %diff.change_type(), "Writing diff");
                let pos = match self.modules.binary_search_by(|m| m.path.cmp(path)) {
                    Ok(pos) => pos,
                    Err(pos) => {
                        self.modules.insert(
                            pos,
                            ModuleDiff {
                                path: path.clone(),
                                resources: BTreeMap::new(),
                            },
                        );
                        pos
                    }
                };
                self.modules[pos].resources.insert(key, diff);
            }
            _ => {
                if let Some(module) = self.modules.iter_mut().find(|m| &m.path == path)
                    && module.resources.remove(&key).is_some()
                {
                    debug!(module = %path, key = %key, "Removed diff");
                }
                self.modules.retain(|m| !m.resources.is_empty());
            }
        }
    }

    /// Iterates over every recorded diff in module and key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ModulePath, &StateKey, &InstanceDiff)> {
        self.modules
            .iter()
            .flat_map(|m| m.resources.iter().map(move |(k, d)| (&m.path, k, d)))
    }

    /// Returns the number of recorded diffs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.iter().map(|m| m.resources.len()).sum()
    }

    /// Returns true if no diff is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoChange => "no change",
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
        };
        write!(f, "{s}")
    }
}
