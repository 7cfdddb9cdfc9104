//! Variable kinds and their payloads.

use indexmap::IndexMap;
use mlld_ast::{CodeLanguage, Node, ValueExpr};
use serde::{Deserialize, Serialize};

/// A primitive value (`/var @n = 3`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimitiveValue {
    Null,
    Bool(bool),
    Number(f64),
}

impl PrimitiveValue {
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => mlld_ast::number_to_json(*n),
        }
    }
}

/// An element of a structured variable: either fully evaluated JSON or an
/// AST fragment still awaiting evaluation.
///
/// A container holding at least one [`DataValue::Deferred`] element has its
/// `is_complex` flag set; the data-value evaluator resolves those fragments
/// on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DataValue {
    Evaluated { value: serde_json::Value },
    Deferred { expr: ValueExpr },
}

impl DataValue {
    #[must_use]
    pub fn evaluated(value: serde_json::Value) -> Self {
        Self::Evaluated { value }
    }

    #[must_use]
    pub fn deferred(expr: ValueExpr) -> Self {
        Self::Deferred { expr }
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// The body and captures of an executable variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableDef {
    pub params: Vec<String>,
    pub body: mlld_ast::ExeBody,
    /// Shadow-environment languages the body sees.
    #[serde(default)]
    pub captured_shadow: Vec<String>,
    /// Key into the module-environment arena on the root environment.
    /// Present on imported executables so they can call their siblings.
    #[serde(default)]
    pub module_env_key: Option<String>,
}

/// A command variable's definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "definition", rename_all = "camelCase")]
pub enum CommandDef {
    CommandTemplate { nodes: Vec<Node> },
    CodeTemplate { lang: CodeLanguage, source: String },
}

/// Where an imported binding came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDescriptor {
    /// The reference as written (`@scope/mod`, path, URL).
    pub reference: String,
    /// The resolved path or URL the content was read from.
    pub resolved: String,
    /// The original name in the exporting file (differs under aliasing).
    pub original_name: String,
}

/// Provenance of a pipeline-input variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInputOrigin {
    pub pipeline_id: String,
    pub stage_index: usize,
}

/// The discriminant and payload of a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VariableKind {
    Primitive {
        value: PrimitiveValue,
    },
    SimpleText {
        text: String,
    },
    Template {
        nodes: Vec<Node>,
    },
    /// Text extracted from a named section of a loaded file.
    SectionText {
        text: String,
        section: String,
    },
    Object {
        entries: IndexMap<String, DataValue>,
        /// True while any entry still holds an unevaluated AST fragment.
        is_complex: bool,
    },
    Array {
        items: Vec<DataValue>,
        is_complex: bool,
    },
    Path {
        resolved: String,
        is_url: bool,
        is_absolute: bool,
    },
    PipelineInput {
        text: String,
        structured: Option<serde_json::Value>,
        origin: PipelineInputOrigin,
    },
    Executable {
        def: ExecutableDef,
    },
    Imported {
        inner: Box<VariableKind>,
        import: ImportDescriptor,
    },
    /// The result of a function resolver (`now`, `debug`, ...).
    Computed {
        value: serde_json::Value,
    },
    Command {
        def: CommandDef,
    },
}

impl VariableKind {
    /// A short kind name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primitive { .. } => "primitive",
            Self::SimpleText { .. } => "text",
            Self::Template { .. } => "template",
            Self::SectionText { .. } => "section",
            Self::Object { .. } => "object",
            Self::Array { .. } => "array",
            Self::Path { .. } => "path",
            Self::PipelineInput { .. } => "pipeline-input",
            Self::Executable { .. } => "executable",
            Self::Imported { .. } => "imported",
            Self::Computed { .. } => "computed",
            Self::Command { .. } => "command",
        }
    }
}
