//! Plan summary types.
//!
//! A [`Plan`] is the user-facing view of a [`PlanDiff`]: one row per
//! changed instance, in module and address order, plus a fingerprint of the
//! whole diff.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use crate::addrs::{ModulePath, ResourceAddress};
use crate::config::ConfigHasher;

use super::diff::{AttributeDiff, DiffType, PlanDiff};

/// A complete plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Unique plan id.
    pub id: Uuid,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Planned changes in module and address order.
    pub changes: Vec<PlannedChange>,
    /// Fingerprint of the planned diff.
    pub fingerprint: String,
}

/// One changed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    /// Instance address.
    pub address: ResourceAddress,
    /// Kind of change.
    pub change: DiffType,
    /// Changed attributes.
    pub attributes: BTreeMap<String, AttributeDiff>,
    /// Whether every planned value is known.
    pub wholly_known: bool,
}

/// Change counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Objects created.
    pub create: usize,
    /// Objects updated in place.
    pub update: usize,
    /// Objects destroyed and created again.
    pub replace: usize,
    /// Objects destroyed.
    pub destroy: usize,
}

impl Plan {
    /// Builds a plan from the diffs recorded during a walk.
    #[must_use]
    pub fn from_diff(diff: &PlanDiff) -> Self {
        let mut changes = Vec::with_capacity(diff.len());

        for (path, key, instance) in diff.iter() {
            let change = instance.change_type();
            if change == DiffType::NoChange {
                continue;
            }
            let address = match key.to_address(path) {
                Ok(address) => address,
                Err(err) => {
                    warn!(module = %path, key = %key, "Skipping diff with unreadable key: {err}");
                    continue;
                }
            };
            changes.push(PlannedChange {
                address,
                change,
                attributes: instance.attributes.clone(),
                wholly_known: instance.wholly_known,
            });
        }

        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            changes,
            fingerprint: ConfigHasher::new().hash_plan(diff),
        }
    }

    /// Returns true if nothing changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Counts changes by kind.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.change {
                DiffType::Create => summary.create += 1,
                DiffType::Update => summary.update += 1,
                DiffType::Replace => summary.replace += 1,
                DiffType::Destroy => summary.destroy += 1,
                DiffType::NoChange => {}
            }
        }
        summary
    }

    /// Returns the change planned for `address`.
    #[must_use]
    pub fn change_for(&self, address: &ResourceAddress) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| &c.address == address)
    }

    /// Returns the changes planned inside `module`.
    pub fn changes_in<'a>(&'a self, module: &'a ModulePath) -> impl Iterator<Item = &'a PlannedChange> {
        self.changes.iter().filter(move |c| &c.address.module == module)
    }
}

impl PlanSummary {
    /// Objects that will exist anew after apply.
    #[must_use]
    pub const fn to_add(&self) -> usize {
        self.create + self.replace
    }

    /// Objects that will be removed after apply.
    #[must_use]
    pub const fn to_destroy(&self) -> usize {
        self.destroy + self.replace
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy.",
            self.to_add(),
            self.update,
            self.to_destroy()
        )
    }
}

impl std::fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.change, self.address)?;
        if !self.wholly_known {
            write!(f, " (known after apply)")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.changes.is_empty() {
            return write!(f, "No changes. Infrastructure is up-to-date.");
        }

        writeln!(f, "Plan {} ({} changes):", self.id, self.changes.len())?;
        for change in &self.changes {
            writeln!(f, "  {change}")?;
        }
        write!(f, "{}", self.summary())
    }
}
