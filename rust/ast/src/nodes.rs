//! Document nodes.
//!
//! A parsed document is a flat `Vec<Node>`. Markdown content arrives as
//! [`Text`]/[`Newline`]/[`CodeFence`] nodes that the evaluator emits
//! verbatim; everything else drives evaluation.

use serde::{Deserialize, Serialize};

use crate::directives::Directive;
use crate::location::Span;
use crate::values::{PipeStage, ValueExpr};

/// Opaque node identifier assigned by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node in a parsed mlld document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Text(Text),
    Newline(Newline),
    Comment(Comment),
    Frontmatter(Frontmatter),
    CodeFence(CodeFence),
    MlldRunBlock(MlldRunBlock),
    Directive(Directive),
    VariableReference(VariableReference),
    ExecInvocation(ExecInvocation),
    FileReference(FileReference),
}

impl Node {
    /// The source span of this node.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Text(n) => n.span,
            Self::Newline(n) => n.span,
            Self::Comment(n) => n.span,
            Self::Frontmatter(n) => n.span,
            Self::CodeFence(n) => n.span,
            Self::MlldRunBlock(n) => n.span,
            Self::Directive(n) => n.span,
            Self::VariableReference(n) => n.span,
            Self::ExecInvocation(n) => n.span,
            Self::FileReference(n) => n.span,
        }
    }

    /// Convenience constructor for a text node without parser metadata.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(Text {
            content: content.into(),
            node_id: NodeId::default(),
            span: Span::default(),
        })
    }
}

/// Verbatim Markdown text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub content: String,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

/// A newline in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Newline {
    #[serde(default)]
    pub span: Span,
}

/// A comment (`>> ...` or `<< ... >>`); never emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub content: String,
    /// Inline comments share a line with emitted content.
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

/// YAML frontmatter. Only valid as the first node of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    /// The raw YAML body between the `---` fences.
    pub content: String,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

/// A fenced code block, emitted verbatim (fences included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFence {
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

/// A ```mlld-run fenced block whose body is evaluated as directives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlldRunBlock {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

/// One step of a field-access chain (`@u.name`, `@xs.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldAccess {
    Key(String),
    Index(i64),
}

impl std::fmt::Display for FieldAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(key) => write!(f, ".{key}"),
            Self::Index(index) => write!(f, ".{index}"),
        }
    }
}

/// A reference to a variable, with optional field access and pipes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableReference {
    pub identifier: String,
    #[serde(default)]
    pub fields: Vec<FieldAccess>,
    #[serde(default)]
    pub pipes: Vec<PipeStage>,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

impl VariableReference {
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            fields: Vec::new(),
            pipes: Vec::new(),
            node_id: NodeId::default(),
            span: Span::new(
                crate::location::Position::new(1, 1, 1),
                crate::location::Position::new(1, 1, 1),
            ),
        }
    }
}

/// An invocation of an executable variable (`@fn(args)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecInvocation {
    pub target: String,
    #[serde(default)]
    pub args: Vec<ValueExpr>,
    #[serde(default)]
    pub pipes: Vec<PipeStage>,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

/// A file reference (`<path>`, `<path # Section>`, or the `<>` placeholder
/// that resolves to the current iteration file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    /// `None` is the `<>` placeholder.
    pub path: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldAccess>,
    #[serde(default)]
    pub pipes: Vec<PipeStage>,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}
