//! Taint tracking across named values.

use std::collections::HashMap;

use crate::descriptor::{SecurityDescriptor, TaintLevel};

/// Records the security descriptor attached to each named value and
/// propagates it along dataflow edges (pipeline stages, assignments).
#[derive(Debug, Clone, Default)]
pub struct TaintTracker {
    descriptors: HashMap<String, SecurityDescriptor>,
}

impl TaintTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or merge into) the descriptor for `name`.
    pub fn record(&mut self, name: impl Into<String>, descriptor: SecurityDescriptor) {
        let name = name.into();
        match self.descriptors.get_mut(&name) {
            Some(existing) => *existing = existing.union(&descriptor),
            None => {
                self.descriptors.insert(name, descriptor);
            }
        }
    }

    /// Propagate the descriptor of `from` onto `to`.
    pub fn propagate(&mut self, from: &str, to: impl Into<String>) {
        if let Some(descriptor) = self.descriptors.get(from).cloned() {
            self.record(to, descriptor);
        }
    }

    #[must_use]
    pub fn descriptor_of(&self, name: &str) -> Option<&SecurityDescriptor> {
        self.descriptors.get(name)
    }

    #[must_use]
    pub fn labels_of(&self, name: &str) -> &[String] {
        self.descriptors
            .get(name)
            .map_or(&[], |descriptor| descriptor.labels.as_slice())
    }

    #[must_use]
    pub fn taint_of(&self, name: &str) -> TaintLevel {
        self.descriptors
            .get(name)
            .map_or(TaintLevel::None, |descriptor| descriptor.taint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagate_merges_labels() {
        let mut tracker = TaintTracker::new();
        tracker.record(
            "input",
            SecurityDescriptor::labeled("dir:/blocked", TaintLevel::Tainted),
        );
        tracker.record("result", SecurityDescriptor::labeled("fs", TaintLevel::None));
        tracker.propagate("input", "result");

        assert_eq!(tracker.taint_of("result"), TaintLevel::Tainted);
        assert!(tracker.labels_of("result").contains(&"dir:/blocked".to_string()));
        assert!(tracker.labels_of("result").contains(&"fs".to_string()));
    }
}
