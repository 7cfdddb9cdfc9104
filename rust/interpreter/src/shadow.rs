//! Shadow environments.
//!
//! A shadow environment is a per-language table of functions exposed to
//! embedded code, so a `js { ... }` body can call its sibling mlld
//! executables. Tables are per-environment; children inherit a copy and
//! executables may capture a subset by language.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A function exposed to embedded code. The body is source in the
/// table's language; the executor splices it into the program prelude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowFunction {
    pub name: String,
    pub params: Vec<String>,
    pub source: String,
}

/// Per-language shadow function tables.
#[derive(Debug, Clone, Default)]
pub struct ShadowEnvironments {
    tables: HashMap<String, IndexMap<String, ShadowFunction>>,
}

impl ShadowEnvironments {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) a function in a language's table.
    pub fn define(&mut self, lang: impl Into<String>, function: ShadowFunction) {
        self.tables
            .entry(lang.into())
            .or_default()
            .insert(function.name.clone(), function);
    }

    /// All functions for a language, in definition order.
    #[must_use]
    pub fn table(&self, lang: &str) -> Vec<ShadowFunction> {
        self.tables
            .get(lang)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.tables.keys().cloned().collect();
        langs.sort();
        langs
    }

    /// A copy restricted to the given languages, as captured by an
    /// executable closure.
    #[must_use]
    pub fn capture(&self, langs: &[String]) -> Self {
        let tables = self
            .tables
            .iter()
            .filter(|(lang, _)| langs.contains(lang))
            .map(|(lang, table)| (lang.clone(), table.clone()))
            .collect();
        Self { tables }
    }

    /// Merge another set of tables over this one (used when a captured
    /// shadow environment is restored for an invocation).
    pub fn merge(&mut self, other: &Self) {
        for (lang, table) in &other.tables {
            let slot = self.tables.entry(lang.clone()).or_default();
            for (name, function) in table {
                slot.insert(name.clone(), function.clone());
            }
        }
    }

    /// Drop every table (cleanup).
    pub fn clear(&mut self) {
        self.tables.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn double() -> ShadowFunction {
        ShadowFunction {
            name: "double".into(),
            params: vec!["n".into()],
            source: "return n * 2;".into(),
        }
    }

    #[test]
    fn capture_restricts_languages() {
        let mut shadow = ShadowEnvironments::new();
        shadow.define("js", double());
        shadow.define("node", double());

        let captured = shadow.capture(&["js".to_string()]);
        assert_eq!(captured.languages(), vec!["js".to_string()]);
        assert_eq!(captured.table("js").len(), 1);
        assert!(captured.table("node").is_empty());
    }

    #[test]
    fn merge_overrides_by_name() {
        let mut base = ShadowEnvironments::new();
        base.define("js", double());

        let mut overlay = ShadowEnvironments::new();
        overlay.define(
            "js",
            ShadowFunction {
                name: "double".into(),
                params: vec!["n".into()],
                source: "return n + n;".into(),
            },
        );

        base.merge(&overlay);
        assert_eq!(base.table("js")[0].source, "return n + n;");
    }
}
