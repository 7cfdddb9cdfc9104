//! Capability contexts and the descriptor stack.
//!
//! Every effect, executable invocation, and import pushes a capability
//! scope on entry and pops it on exit. The effective descriptor at any
//! point is the union of the stack over the base descriptor.

use serde::{Deserialize, Serialize};

use crate::descriptor::SecurityDescriptor;

/// What kind of operation a capability scope covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Effect,
    Exe,
    Import,
    Run,
    Output,
    Guard,
}

impl CapabilityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Effect => "effect",
            Self::Exe => "exe",
            Self::Import => "import",
            Self::Run => "run",
            Self::Output => "output",
            Self::Guard => "guard",
        }
    }
}

/// How an import's content was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    Local,
    Url,
    Registry,
    Builtin,
}

/// The context produced by pushing a capability scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityContext {
    pub kind: CapabilityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_type: Option<ImportType>,
    pub descriptor: SecurityDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<serde_json::Value>,
}

impl CapabilityContext {
    #[must_use]
    pub fn new(kind: CapabilityKind, descriptor: SecurityDescriptor) -> Self {
        Self {
            kind,
            import_type: None,
            descriptor,
            metadata: None,
            operation: None,
            policy: None,
        }
    }
}

/// A push/pop-balanced stack of capability scopes.
///
/// A pop without a matching push is a programmer error, surfaced as `None`
/// so the caller can raise its internal-error kind.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStack {
    base: SecurityDescriptor,
    frames: Vec<CapabilityContext>,
}

impl DescriptorStack {
    #[must_use]
    pub fn new(base: SecurityDescriptor) -> Self {
        Self {
            base,
            frames: Vec::new(),
        }
    }

    pub fn push(&mut self, context: CapabilityContext) {
        self.frames.push(context);
    }

    /// Pop the top scope. Returns `None` on an empty stack.
    pub fn pop(&mut self) -> Option<CapabilityContext> {
        self.frames.pop()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn top(&self) -> Option<&CapabilityContext> {
        self.frames.last()
    }

    /// The effective descriptor: the union of every frame over the base.
    #[must_use]
    pub fn effective(&self) -> SecurityDescriptor {
        self.frames
            .iter()
            .fold(self.base.clone(), |acc, frame| acc.union(&frame.descriptor))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::descriptor::TaintLevel;

    #[test]
    fn push_pop_restores_effective_descriptor() {
        let mut stack = DescriptorStack::default();
        let before = stack.effective();

        stack.push(CapabilityContext::new(
            CapabilityKind::Exe,
            SecurityDescriptor::labeled("exec", TaintLevel::Tainted),
        ));
        assert_eq!(stack.effective().taint, TaintLevel::Tainted);

        stack.pop().expect("balanced");
        assert_eq!(stack.effective(), before);
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut stack = DescriptorStack::default();
        assert!(stack.pop().is_none());
    }
}
