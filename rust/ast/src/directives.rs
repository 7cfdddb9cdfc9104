//! Directive payloads.

use serde::{Deserialize, Serialize};

use crate::location::Span;
use crate::nodes::{Node, NodeId};
use crate::values::{PipeStage, ValueExpr};

/// A directive embedded in the document (`/var`, `/exe`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub span: Span,
}

impl Directive {
    #[must_use]
    pub fn new(kind: DirectiveKind) -> Self {
        Self {
            kind,
            node_id: NodeId::default(),
            span: Span::default(),
        }
    }

    /// The directive's slash name (`var`, `exe`, ...).
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// The payload of a directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "camelCase")]
pub enum DirectiveKind {
    Var(VarDirective),
    Exe(ExeDirective),
    Run(RunDirective),
    Show(ShowDirective),
    Output(OutputDirective),
    Import(ImportDirective),
    Export(ExportDirective),
    When(WhenDirective),
    For(ForDirective),
    Path(PathDirective),
    Guard(GuardDirective),
}

impl DirectiveKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Var(..) => "var",
            Self::Exe(..) => "exe",
            Self::Run(..) => "run",
            Self::Show(..) => "show",
            Self::Output(..) => "output",
            Self::Import(..) => "import",
            Self::Export(..) => "export",
            Self::When(..) => "when",
            Self::For(..) => "for",
            Self::Path(..) => "path",
            Self::Guard(..) => "guard",
        }
    }
}

/// How `/var` binds: fresh assignment or `+=` append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignOp {
    #[default]
    Assign,
    Append,
}

/// `/var @name = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDirective {
    pub name: String,
    pub value: ValueExpr,
    #[serde(default)]
    pub op: AssignOp,
}

/// The language of an embedded code body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Js,
    Node,
    Sh,
}

impl CodeLanguage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Node => "node",
            Self::Sh => "sh",
        }
    }
}

impl std::fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The body of an `/exe` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "body", rename_all = "camelCase")]
pub enum ExeBody {
    /// `{echo @x}` — a shell command template.
    Command { nodes: Vec<Node> },
    /// `js { ... }` / `node { ... }` / `sh { ... }` — embedded code.
    Code { lang: CodeLanguage, source: String },
    /// A text template body.
    Template { nodes: Vec<Node> },
}

/// `/exe @name(params) = body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExeDirective {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: ExeBody,
    /// Which shadow-environment languages the body captures.
    #[serde(default)]
    pub captures: Vec<String>,
}

/// `/run {command}` or `/run lang { code }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDirective {
    pub body: ExeBody,
    /// Convert non-zero exits into collected errors instead of failing.
    #[serde(default)]
    pub collect_errors: bool,
    #[serde(default)]
    pub pipes: Vec<PipeStage>,
}

/// `/show value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowDirective {
    pub value: ValueExpr,
}

/// Where `/output` routes its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "camelCase")]
pub enum OutputTarget {
    Stdout,
    Stderr,
    File { path: ValueExpr, append: bool },
}

/// `/output value to target`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDirective {
    pub value: ValueExpr,
    pub target: OutputTarget,
}

/// A single imported name, optionally aliased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBinding {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ImportBinding {
    /// The name the binding takes in the importing file.
    #[must_use]
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// The shape of an `/import` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause", rename_all = "camelCase")]
pub enum ImportClause {
    /// `{ a, b as c } from "..."`
    Named { bindings: Vec<ImportBinding> },
    /// `* as ns from "..."`
    Namespace { alias: String },
    /// `"..."` — evaluate for side effects only.
    SideEffect,
}

/// `/import clause from reference`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDirective {
    /// `@scope/mod`, a relative path, a URL, or a built-in name.
    pub reference: String,
    pub clause: ImportClause,
}

/// `/export { names }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDirective {
    pub names: Vec<String>,
}

/// The condition of a `/when` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "camelCase")]
pub enum WhenCondition {
    /// An expression that must be truthy.
    Expr { expr: ValueExpr },
    /// Matches when the surrounding operation was denied by a guard.
    Denied,
    /// The fall-through arm.
    Otherwise,
}

/// One `condition => actions` arm of `/when`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenArm {
    pub condition: WhenCondition,
    pub actions: Vec<Node>,
}

/// `/when ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenDirective {
    pub arms: Vec<WhenArm>,
    /// When true, every matching arm runs; otherwise the first match wins.
    #[serde(default)]
    pub all: bool,
}

/// `/for @x in iterable => body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForDirective {
    pub binding: String,
    pub iterable: ValueExpr,
    pub body: Vec<Node>,
}

/// `/path @name = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathDirective {
    pub name: String,
    pub value: ValueExpr,
}

/// When a guard runs relative to the operation it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardTiming {
    Before,
    After,
}

/// The predicate a guard evaluates against a stage's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cond", rename_all = "camelCase")]
pub enum GuardCondition {
    Always,
    /// The input's security descriptor carries the given taint label.
    HasLabel { label: String },
    Not { inner: Box<GuardCondition> },
    AnyOf { conditions: Vec<GuardCondition> },
}

/// What a matching guard decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GuardDecisionSpec {
    Allow,
    Deny { reason: String },
    /// Retry with an optional hint. A function-valued hint (an exec
    /// invocation) is evaluated at retry time, not at definition time.
    Retry { hint: Option<ValueExpr> },
}

/// `/guard @name before @target when condition => decision`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardDirective {
    pub name: String,
    pub timing: GuardTiming,
    /// Exec name this guard applies to; `None` matches every stage.
    #[serde(default)]
    pub target: Option<String>,
    pub condition: GuardCondition,
    pub decision: GuardDecisionSpec,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::values::Primitive;

    #[test]
    fn directive_names() {
        let d = Directive::new(DirectiveKind::Var(VarDirective {
            name: "greeting".into(),
            value: ValueExpr::Primitive {
                value: Primitive::String("hi".into()),
            },
            op: AssignOp::Assign,
        }));
        assert_eq!(d.name(), "var");
    }

    #[test]
    fn import_binding_local_name() {
        let plain = ImportBinding {
            name: "helper".into(),
            alias: None,
        };
        let aliased = ImportBinding {
            name: "helper".into(),
            alias: Some("util".into()),
        };
        assert_eq!(plain.local_name(), "helper");
        assert_eq!(aliased.local_name(), "util");
    }

    #[test]
    fn guard_round_trips_through_json() {
        let guard = GuardDirective {
            name: "no_untrusted".into(),
            timing: GuardTiming::Before,
            target: Some("runBlocked".into()),
            condition: GuardCondition::HasLabel {
                label: "dir:/dir-parent-blocked".into(),
            },
            decision: GuardDecisionSpec::Deny {
                reason: "blocked directory".into(),
            },
        };
        let json = serde_json::to_string(&guard).expect("serialize");
        let back: GuardDirective = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(guard, back);
    }
}
