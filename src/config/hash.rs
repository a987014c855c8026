//! Fingerprinting of resolved configuration, state, and diffs.
//!
//! Every hashed type serializes through ordered maps, so the same value
//! always produces the same fingerprint. Fingerprints identify a plan and
//! let a re-run be checked for idempotence without comparing whole values.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::eval::ResolvedConfig;
use crate::planner::diff::{InstanceDiff, PlanDiff};
use crate::state::InstanceState;

/// Hasher for computing deterministic fingerprints.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes the canonical JSON encoding of any serializable value.
    ///
    /// A value that fails to serialize hashes as the empty input.
    #[must_use]
    pub fn hash_serialized<T: Serialize>(&self, value: &T) -> String {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Fingerprint of a resolved configuration, unknown markers included.
    #[must_use]
    pub fn hash_resolved(&self, config: &ResolvedConfig) -> String {
        self.hash_serialized(config)
    }

    /// Fingerprint of an instance snapshot.
    #[must_use]
    pub fn hash_instance_state(&self, state: &InstanceState) -> String {
        self.hash_serialized(state)
    }

    /// Fingerprint of a single instance diff.
    #[must_use]
    pub fn hash_diff(&self, diff: &InstanceDiff) -> String {
        self.hash_serialized(diff)
    }

    /// Fingerprint of every diff planned in a run.
    #[must_use]
    pub fn hash_plan(&self, diff: &PlanDiff) -> String {
        self.hash_serialized(diff)
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, StateKey};
    use crate::planner::diff::AttributeDiff;
    use serde_json::json;

    fn resolved(ami: &str) -> ResolvedConfig {
        let mut config = ResolvedConfig::default();
        config.values.insert(String::from("ami"), json!(ami));
        config.values.insert(String::from("size"), json!("t3.micro"));
        config
    }

    #[test]
    fn test_resolved_hash_deterministic() {
        let hasher = ConfigHasher::new();
        assert_eq!(
            hasher.hash_resolved(&resolved("ami-1")),
            hasher.hash_resolved(&resolved("ami-1"))
        );
        assert_ne!(
            hasher.hash_resolved(&resolved("ami-1")),
            hasher.hash_resolved(&resolved("ami-2"))
        );
    }

    #[test]
    fn test_unknown_markers_change_hash() {
        let hasher = ConfigHasher::new();
        let known = resolved("ami-1");
        let mut unknown = resolved("ami-1");
        unknown.unknown.insert(String::from("ami"));
        assert_ne!(hasher.hash_resolved(&known), hasher.hash_resolved(&unknown));
    }

    #[test]
    fn test_plan_hash_ignores_insertion_order() {
        let hasher = ConfigHasher::new();
        let root = ModulePath::root();
        let mut diff = InstanceDiff::new();
        diff.attributes
            .insert(String::from("ami"), AttributeDiff::change("a", "b"));

        let mut first = PlanDiff::new();
        first.set(&root, StateKey::from_raw("aws_instance.a"), Some(diff.clone()));
        first.set(&root, StateKey::from_raw("aws_instance.b"), Some(diff.clone()));
        let mut second = PlanDiff::new();
        second.set(&root, StateKey::from_raw("aws_instance.b"), Some(diff.clone()));
        second.set(&root, StateKey::from_raw("aws_instance.a"), Some(diff));

        assert_eq!(hasher.hash_plan(&first), hasher.hash_plan(&second));
    }

    #[test]
    fn test_instance_fingerprints() {
        let hasher = ConfigHasher::new();
        let state = InstanceState::new("i-1").with_attr("ami", "ami-1");
        assert_eq!(
            hasher.hash_instance_state(&state),
            hasher.hash_instance_state(&state.clone())
        );
        assert_ne!(
            hasher.hash_instance_state(&state),
            hasher.hash_instance_state(&state.clone().tainted())
        );

        let mut update = InstanceDiff::new();
        update
            .attributes
            .insert(String::from("ami"), AttributeDiff::change("ami-1", "ami-2"));
        let mut replace = update.clone();
        replace
            .attributes
            .insert(String::from("ami"), AttributeDiff::change("ami-1", "ami-2").forces_new());
        assert_eq!(hasher.hash_diff(&update), hasher.hash_diff(&update.clone()));
        assert_ne!(hasher.hash_diff(&update), hasher.hash_diff(&replace));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let full_hash = "abcdef1234567890abcdef1234567890";
        let short = hasher.short_hash(full_hash);

        assert_eq!(short, "abcdef12");
        assert_eq!(short.len(), 8);
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
