//! Policy configuration and the import approval gate.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Project security policy.
///
/// Serialized in config files; normalization (dedup, ordering, lowercase
/// keys) makes two equivalent spellings compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Taint labels that deny an operation outright.
    #[serde(default)]
    pub denied_labels: Vec<String>,
    /// Content hashes pre-approved for import.
    #[serde(default)]
    pub approved_hashes: Vec<String>,
    /// Per-capability overrides keyed by capability kind name.
    #[serde(default)]
    pub capability_rules: IndexMap<String, Vec<String>>,
}

/// Normalize a policy: sort + dedup label and hash lists, lowercase rule
/// keys, drop rules with no entries. Idempotent.
#[must_use]
pub fn normalize_policy_config(config: &PolicyConfig) -> PolicyConfig {
    let mut denied_labels = config.denied_labels.clone();
    denied_labels.sort();
    denied_labels.dedup();

    let mut approved_hashes = config.approved_hashes.clone();
    approved_hashes.sort();
    approved_hashes.dedup();

    let mut capability_rules = IndexMap::new();
    for (key, values) in &config.capability_rules {
        let mut values = values.clone();
        values.sort();
        values.dedup();
        if values.is_empty() {
            continue;
        }
        capability_rules.insert(key.to_lowercase(), values);
    }
    capability_rules.sort_keys();

    PolicyConfig {
        denied_labels,
        approved_hashes,
        capability_rules,
    }
}

/// The outcome of asking the approval gate about imported content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportApprovalDecision {
    Approved,
    Denied { reason: String },
}

impl ImportApprovalDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Gate consulted before imported content is handed to the evaluator.
///
/// Implementations see the content hash and the reference that produced
/// it; interactive gates may prompt, policy gates check an allowlist.
pub trait ApprovalGate: Send + Sync + std::fmt::Debug {
    fn check(&self, reference: &str, content_hash: &str) -> ImportApprovalDecision;
}

/// Approves everything. Used when approve-all is set on the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl ApprovalGate for ApproveAll {
    fn check(&self, _reference: &str, _content_hash: &str) -> ImportApprovalDecision {
        ImportApprovalDecision::Approved
    }
}

/// Approves content whose hash appears in a fixed allowlist.
#[derive(Debug, Clone, Default)]
pub struct HashAllowlistGate {
    hashes: HashSet<String>,
}

impl HashAllowlistGate {
    #[must_use]
    pub fn new(hashes: impl IntoIterator<Item = String>) -> Self {
        Self {
            hashes: hashes.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        Self::new(policy.approved_hashes.iter().cloned())
    }
}

impl ApprovalGate for HashAllowlistGate {
    fn check(&self, reference: &str, content_hash: &str) -> ImportApprovalDecision {
        if self.hashes.contains(content_hash) {
            ImportApprovalDecision::Approved
        } else {
            ImportApprovalDecision::Denied {
                reason: format!("content of {reference} is not in the approved-hash list"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        let mut rules = IndexMap::new();
        rules.insert("Exe".to_string(), vec!["b".into(), "a".into(), "b".into()]);
        rules.insert("empty".to_string(), Vec::new());
        let config = PolicyConfig {
            denied_labels: vec!["z".into(), "a".into(), "z".into()],
            approved_hashes: vec!["deadbeef".into(), "deadbeef".into()],
            capability_rules: rules,
        };

        let once = normalize_policy_config(&config);
        let twice = normalize_policy_config(&once);
        assert_eq!(once, twice);
        assert_eq!(once.denied_labels, vec!["a", "z"]);
        assert_eq!(once.capability_rules.get("exe"), Some(&vec!["a".to_string(), "b".to_string()]));
        assert!(!once.capability_rules.contains_key("empty"));
    }

    #[test]
    fn allowlist_gate() {
        let gate = HashAllowlistGate::new(["abc123".to_string()]);
        assert!(gate.check("@scope/mod", "abc123").is_approved());
        assert!(!gate.check("@scope/mod", "ffffff").is_approved());
    }
}
