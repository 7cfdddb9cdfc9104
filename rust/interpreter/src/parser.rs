//! The module parser contract.
//!
//! The runtime never parses source text itself. Imported module content
//! is handed to whatever [`ModuleParser`] the root environment was
//! configured with; the grammar lives outside this workspace.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use mlld_ast::Node;

use crate::error::{MlldError, MlldResult};

/// Parses module source into document nodes.
pub trait ModuleParser: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// Implementations surface their grammar's parse errors.
    fn parse(&self, source: &str, path: &str) -> MlldResult<Vec<Node>>;
}

/// Fails every parse. The default when no parser is wired in; imports of
/// module content are then unavailable, but data/text imports still work.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredParser;

impl ModuleParser for UnconfiguredParser {
    fn parse(&self, _source: &str, path: &str) -> MlldResult<Vec<Node>> {
        Err(MlldError::internal(format!(
            "no module parser configured (importing {path})"
        )))
    }
}

/// A parser that returns pre-parsed nodes keyed by exact source text.
/// Used by tests, which have no grammar.
#[derive(Debug, Default)]
pub struct StaticParser {
    modules: Mutex<HashMap<String, Vec<Node>>>,
}

impl StaticParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: impl Into<String>, nodes: Vec<Node>) {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.into(), nodes);
    }
}

impl ModuleParser for StaticParser {
    fn parse(&self, source: &str, path: &str) -> MlldResult<Vec<Node>> {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
            .ok_or_else(|| MlldError::internal(format!("no parsed nodes registered for {path}")))
    }
}
