//! The guard registry and guard evaluation.
//!
//! Guards are named policy predicates registered by `/guard`. The
//! pipeline's pre-hook consults the registry for guards whose timing and
//! target match the stage call site, evaluates their conditions against
//! the stage input's security descriptor, and turns matches into
//! decisions: allow, deny (with reason), or retry (with an optional
//! hint). Denial is an outcome, never an error.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use indexmap::IndexMap;
use mlld_ast::{GuardCondition, GuardDecisionSpec, GuardDirective, GuardTiming, ValueExpr};
use mlld_security::SecurityDescriptor;

use crate::error::{MlldError, MlldResult};

/// A guard's verdict for one stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Allow,
    Deny {
        guard: String,
        reason: String,
    },
    /// Retry the stage. A hint expression is evaluated by the engine at
    /// retry time against the then-current pipeline context.
    Retry {
        guard: String,
        hint: Option<ValueExpr>,
    },
}

impl GuardDecision {
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// One recorded guard execution, kept for post-hook history.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardRecord {
    pub guard: String,
    pub stage: String,
    pub stage_index: usize,
    pub attempt: u32,
    pub outcome: String,
}

/// Evaluate a guard condition against a descriptor.
#[must_use]
pub fn condition_matches(condition: &GuardCondition, descriptor: &SecurityDescriptor) -> bool {
    match condition {
        GuardCondition::Always => true,
        GuardCondition::HasLabel { label } => descriptor.has_label(label),
        GuardCondition::Not { inner } => !condition_matches(inner, descriptor),
        GuardCondition::AnyOf { conditions } => conditions
            .iter()
            .any(|inner| condition_matches(inner, descriptor)),
    }
}

/// Registry of guard definitions with parent-chain inheritance.
///
/// `create_child` inherits the parent's definitions without mutating
/// them; serialization round-trips only a registry's own definitions so
/// guards can cross module boundaries.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    parent: Option<Arc<GuardRegistry>>,
    own: RwLock<IndexMap<String, GuardDirective>>,
    history: Mutex<Vec<GuardRecord>>,
}

impl GuardRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A child registry that sees this registry's definitions.
    #[must_use]
    pub fn create_child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(self.clone()),
            own: RwLock::new(IndexMap::new()),
            history: Mutex::new(Vec::new()),
        })
    }

    /// Register (or replace) a guard under its name.
    pub fn register(&self, definition: GuardDirective) {
        self.own
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.name.clone(), definition);
    }

    /// Serialize this registry's own definitions (not inherited ones).
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization fails.
    pub fn serialize_own(&self) -> MlldResult<String> {
        let own = self.own.read().unwrap_or_else(PoisonError::into_inner);
        let definitions: Vec<&GuardDirective> = own.values().collect();
        serde_json::to_string(&definitions)
            .map_err(|err| MlldError::internal(format!("guard serialization failed: {err}")))
    }

    /// Import definitions serialized by [`serialize_own`](Self::serialize_own).
    ///
    /// # Errors
    ///
    /// Returns an internal error on malformed input.
    pub fn import_serialized(&self, serialized: &str) -> MlldResult<()> {
        let definitions: Vec<GuardDirective> = serde_json::from_str(serialized)
            .map_err(|err| MlldError::internal(format!("guard deserialization failed: {err}")))?;
        for definition in definitions {
            self.register(definition);
        }
        Ok(())
    }

    /// Guards matching a stage call site, own definitions first, then
    /// inherited ones not shadowed by name.
    #[must_use]
    pub fn matching(&self, timing: GuardTiming, stage: &str) -> Vec<GuardDirective> {
        // Nearest-first walk of the parent chain; a name seen closer to
        // the leaf shadows the same name further up.
        let mut seen: Vec<String> = Vec::new();
        let mut matches = Vec::new();
        let mut collect = |registry: &GuardRegistry| {
            let own = registry.own.read().unwrap_or_else(PoisonError::into_inner);
            for definition in own.values() {
                if seen.contains(&definition.name) {
                    continue;
                }
                seen.push(definition.name.clone());
                if definition.timing != timing {
                    continue;
                }
                if definition
                    .target
                    .as_deref()
                    .is_some_and(|target| target != stage)
                {
                    continue;
                }
                matches.push(definition.clone());
            }
        };

        collect(self);
        let mut parent = self.parent.clone();
        while let Some(current) = parent {
            collect(&current);
            parent = current.parent.clone();
        }
        matches
    }

    /// Evaluate the matching `before` guards against the stage input's
    /// descriptor; the first non-allow decision wins.
    #[must_use]
    pub fn decide_before(&self, stage: &str, descriptor: &SecurityDescriptor) -> GuardDecision {
        for guard in self.matching(GuardTiming::Before, stage) {
            if !condition_matches(&guard.condition, descriptor) {
                continue;
            }
            match guard.decision {
                GuardDecisionSpec::Allow => continue,
                GuardDecisionSpec::Deny { reason } => {
                    return GuardDecision::Deny {
                        guard: guard.name,
                        reason,
                    };
                }
                GuardDecisionSpec::Retry { hint } => {
                    return GuardDecision::Retry {
                        guard: guard.name,
                        hint,
                    };
                }
            }
        }
        GuardDecision::Allow
    }

    /// Record a guard outcome (post-hook).
    pub fn record(&self, record: GuardRecord) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    #[must_use]
    pub fn history(&self) -> Vec<GuardRecord> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use mlld_security::TaintLevel;
    use pretty_assertions::assert_eq;

    use super::*;

    fn deny_guard(name: &str, target: Option<&str>, label: &str) -> GuardDirective {
        GuardDirective {
            name: name.into(),
            timing: GuardTiming::Before,
            target: target.map(Into::into),
            condition: GuardCondition::HasLabel {
                label: label.into(),
            },
            decision: GuardDecisionSpec::Deny {
                reason: format!("label {label} is blocked"),
            },
        }
    }

    #[test]
    fn deny_fires_only_on_matching_label() {
        let registry = GuardRegistry::new();
        registry.register(deny_guard("no_blocked", Some("runBlocked"), "dir:/blocked"));

        let clean = SecurityDescriptor::default();
        assert!(registry.decide_before("runBlocked", &clean).is_allow());

        let tainted = SecurityDescriptor::labeled("dir:/blocked", TaintLevel::Tainted);
        match registry.decide_before("runBlocked", &tainted) {
            GuardDecision::Deny { guard, .. } => assert_eq!(guard, "no_blocked"),
            other => panic!("expected deny, got {other:?}"),
        }

        // Other stages are untouched.
        assert!(registry.decide_before("other", &tainted).is_allow());
    }

    #[test]
    fn child_inherits_and_shadows() {
        let parent = Arc::new(GuardRegistry::new());
        parent.register(deny_guard("g", None, "x"));

        let child = parent.create_child();
        let tainted = SecurityDescriptor::labeled("x", TaintLevel::Tainted);
        assert!(!child.decide_before("stage", &tainted).is_allow());

        // Shadow the inherited guard with an always-allow one.
        child.register(GuardDirective {
            name: "g".into(),
            timing: GuardTiming::Before,
            target: None,
            condition: GuardCondition::Always,
            decision: GuardDecisionSpec::Allow,
        });
        assert!(child.decide_before("stage", &tainted).is_allow());

        // The parent is unchanged.
        assert!(!parent.decide_before("stage", &tainted).is_allow());
    }

    #[test]
    fn serialization_round_trip() {
        let source = GuardRegistry::new();
        source.register(deny_guard("g1", Some("s"), "l"));
        let serialized = source.serialize_own().expect("serialize");

        let target = GuardRegistry::new();
        target.import_serialized(&serialized).expect("import");
        assert_eq!(target.matching(GuardTiming::Before, "s").len(), 1);
    }
}
