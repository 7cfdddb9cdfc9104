//! Security descriptors and taint levels.

use serde::{Deserialize, Serialize};

/// How trusted a value is. Composition takes the upper bound.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaintLevel {
    #[default]
    None,
    Tainted,
    Untrusted,
}

impl TaintLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tainted => "tainted",
            Self::Untrusted => "untrusted",
        }
    }
}

/// Provenance attached to a value or effect: labels, sources, and a taint
/// level, plus optional policy context for guard decisions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub taint: TaintLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_context: Option<serde_json::Value>,
}

impl SecurityDescriptor {
    /// A descriptor carrying a single label at the given taint level.
    #[must_use]
    pub fn labeled(label: impl Into<String>, taint: TaintLevel) -> Self {
        Self {
            labels: vec![label.into()],
            sources: Vec::new(),
            taint,
            policy_context: None,
        }
    }

    /// A descriptor recording only a source.
    #[must_use]
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            sources: vec![source.into()],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Compose two descriptors: union of labels and sources (first-seen
    /// order, deduplicated) and upper bound of taint. Policy context from
    /// `self` wins when both are present.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut labels = self.labels.clone();
        for label in &other.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        let mut sources = self.sources.clone();
        for source in &other.sources {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }
        Self {
            labels,
            sources,
            taint: self.taint.max(other.taint),
            policy_context: self
                .policy_context
                .clone()
                .or_else(|| other.policy_context.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn union_dedups_and_upper_bounds() {
        let a = SecurityDescriptor {
            labels: vec!["net".into(), "fs".into()],
            sources: vec!["file:/a".into()],
            taint: TaintLevel::Tainted,
            policy_context: None,
        };
        let b = SecurityDescriptor {
            labels: vec!["fs".into(), "env".into()],
            sources: vec!["file:/a".into(), "url:https://x".into()],
            taint: TaintLevel::None,
            policy_context: None,
        };
        let merged = a.union(&b);
        assert_eq!(merged.labels, vec!["net", "fs", "env"]);
        assert_eq!(merged.sources, vec!["file:/a", "url:https://x"]);
        assert_eq!(merged.taint, TaintLevel::Tainted);
    }

    #[test]
    fn taint_ordering() {
        assert!(TaintLevel::None < TaintLevel::Tainted);
        assert!(TaintLevel::Tainted < TaintLevel::Untrusted);
    }
}
