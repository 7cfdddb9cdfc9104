//! Variable source and metadata records.

use indexmap::IndexMap;
use mlld_ast::Span;
use serde::{Deserialize, Serialize};

/// The directive that defined a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDirective {
    Var,
    Exe,
    Path,
    Import,
    Parameter,
    /// Bound by the runtime itself (reserved names, transformers).
    Builtin,
    Pipeline,
    For,
    Frontmatter,
}

/// The syntax form the definition used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyntaxForm {
    Literal,
    Template,
    Object,
    Array,
    Command,
    Code,
    Reference,
    Load,
}

/// How a variable came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSource {
    pub directive: SourceDirective,
    pub syntax: SyntaxForm,
    pub has_interpolation: bool,
}

impl VariableSource {
    #[must_use]
    pub fn new(directive: SourceDirective, syntax: SyntaxForm) -> Self {
        Self {
            directive,
            syntax,
            has_interpolation: false,
        }
    }

    #[must_use]
    pub fn with_interpolation(mut self) -> Self {
        self.has_interpolation = true;
        self
    }
}

/// Metadata shared by every variable kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableMetadata {
    /// Where the definition appeared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defined_at: Option<Span>,
    /// Free-form provenance note (importing file, resolver name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
    /// Reserved names are owned by the runtime and cannot be rebound.
    #[serde(default)]
    pub reserved: bool,
    /// Immutable variables fail any mutation.
    #[serde(default)]
    pub immutable: bool,
    /// Parameters bypass redefinition and reserved-name checks.
    #[serde(default)]
    pub is_parameter: bool,
    /// For transformer parents: variant name → variant variable name
    /// (`"indent"` → `"json.indent"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer_variants: Option<IndexMap<String, String>>,
}

impl VariableMetadata {
    #[must_use]
    pub fn reserved() -> Self {
        Self {
            reserved: true,
            immutable: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn parameter() -> Self {
        Self {
            is_parameter: true,
            ..Self::default()
        }
    }
}
