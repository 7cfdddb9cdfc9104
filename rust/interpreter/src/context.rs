//! Ambient evaluation context.
//!
//! The context manager owns the operation, pipeline, guard, and denial
//! stacks. Every push has exactly one pop on every execution path,
//! including retries and denials; the pipeline engine and the directive
//! evaluator are the only writers.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::pipeline::PipelineContextSnapshot;

/// The operation a directive is currently performing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    pub directive: String,
    pub operation: String,
}

/// Recorded when a guard denies an operation; consumed by `when denied`
/// arms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedContext {
    pub guard: String,
    pub reason: String,
    pub stage: Option<String>,
}

/// Operation, pipeline, guard, and denial stacks.
#[derive(Debug, Default)]
pub struct ContextManager {
    ops: Mutex<Vec<OpContext>>,
    pipeline: Mutex<Vec<PipelineContextSnapshot>>,
    guards: Mutex<Vec<String>>,
    guard_suppression: AtomicUsize,
    denied: Mutex<Option<DeniedContext>>,
    pipes: Mutex<Vec<String>>,
}

impl ContextManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- Operations -------------------------------------------------------

    pub fn push_op(&self, op: OpContext) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }

    pub fn pop_op(&self) -> Option<OpContext> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    #[must_use]
    pub fn current_op(&self) -> Option<OpContext> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    // -- Pipeline ---------------------------------------------------------

    pub fn set_pipeline_context(&self, snapshot: PipelineContextSnapshot) {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot);
    }

    /// Replace the top snapshot in place (attempt bumps, hint updates).
    pub fn update_pipeline_context(&self, snapshot: PipelineContextSnapshot) {
        let mut stack = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(top) = stack.last_mut() {
            *top = snapshot;
        } else {
            stack.push(snapshot);
        }
    }

    pub fn clear_pipeline_context(&self) -> Option<PipelineContextSnapshot> {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    #[must_use]
    pub fn pipeline_context(&self) -> Option<PipelineContextSnapshot> {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    #[must_use]
    pub fn pipeline_depth(&self) -> usize {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // -- Guards -----------------------------------------------------------

    pub fn begin_guard(&self, name: impl Into<String>) {
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.into());
    }

    pub fn end_guard(&self) {
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
    }

    #[must_use]
    pub fn active_guard(&self) -> Option<String> {
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Suppress guard evaluation while a guard body runs, preventing
    /// recursive guard evaluation.
    pub fn suppress_guards(&self) {
        self.guard_suppression.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unsuppress_guards(&self) {
        self.guard_suppression.fetch_sub(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn should_suppress_guards(&self) -> bool {
        self.guard_suppression.load(Ordering::SeqCst) > 0
    }

    // -- Denials ----------------------------------------------------------

    pub fn set_denied(&self, denied: DeniedContext) {
        *self.denied.lock().unwrap_or_else(PoisonError::into_inner) = Some(denied);
    }

    /// Consume the pending denial, if any.
    pub fn take_denied(&self) -> Option<DeniedContext> {
        self.denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    #[must_use]
    pub fn peek_denied(&self) -> Option<DeniedContext> {
        self.denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // -- Condensed pipes --------------------------------------------------

    pub fn push_pipe(&self, name: impl Into<String>) {
        self.pipes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.into());
    }

    pub fn pop_pipe(&self) {
        self.pipes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn guard_suppression_nests() {
        let manager = ContextManager::new();
        assert!(!manager.should_suppress_guards());
        manager.suppress_guards();
        manager.suppress_guards();
        manager.unsuppress_guards();
        assert!(manager.should_suppress_guards());
        manager.unsuppress_guards();
        assert!(!manager.should_suppress_guards());
    }

    #[test]
    fn denial_is_consumed_once() {
        let manager = ContextManager::new();
        manager.set_denied(DeniedContext {
            guard: "no_untrusted".into(),
            reason: "taint".into(),
            stage: Some("runBlocked".into()),
        });
        assert!(manager.peek_denied().is_some());
        assert_eq!(manager.take_denied().map(|d| d.guard), Some("no_untrusted".into()));
        assert!(manager.take_denied().is_none());
    }
}
