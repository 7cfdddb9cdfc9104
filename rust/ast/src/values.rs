//! Value expressions.
//!
//! The right-hand side of `/var`, arguments to exec invocations, and
//! condition expressions all parse to [`ValueExpr`]. Templates embed
//! document nodes so interpolation can reuse the node walker.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::nodes::{ExecInvocation, FileReference, Node, VariableReference};

/// A literal primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Primitive {
    /// Convert to a JSON value. Whole numbers become JSON integers so
    /// they render without a trailing `.0`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Whole floats map to JSON integers; everything else stays a float.
#[must_use]
pub fn number_to_json(n: f64) -> serde_json::Value {
    #[allow(clippy::cast_possible_truncation)]
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::Number(serde_json::Number::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

/// A value expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValueExpr {
    /// A literal number, boolean, string, or null.
    Primitive { value: Primitive },
    /// A double-quoted string with interpolation; nodes are text,
    /// variable references, file references, and exec invocations.
    Template { nodes: Vec<Node> },
    /// An object literal. Values may themselves need evaluation.
    Object { entries: IndexMap<String, ValueExpr> },
    /// An array literal.
    Array { items: Vec<ValueExpr> },
    /// A reference to an existing variable.
    Reference { reference: VariableReference },
    /// An invocation of an executable.
    Invocation { invocation: ExecInvocation },
    /// A `<file>` load.
    Load { reference: FileReference },
    /// A value piped through one or more stages.
    Pipeline {
        source: Box<ValueExpr>,
        stages: Vec<PipeStage>,
    },
}

impl ValueExpr {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Primitive {
            value: Primitive::String(s.into()),
        }
    }

    #[must_use]
    pub fn template(nodes: Vec<Node>) -> Self {
        Self::Template { nodes }
    }
}

/// A short-form effect usable as a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectStageKind {
    Show,
    Log,
    Output,
}

impl EffectStageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Log => "log",
            Self::Output => "output",
        }
    }
}

/// One stage of a pipeline: a named executable or a short-form effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum PipeStage {
    Exec {
        target: String,
        #[serde(default)]
        args: Vec<ValueExpr>,
    },
    Effect { effect: EffectStageKind },
}

impl PipeStage {
    /// Stage name for diagnostics and guard matching.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Exec { target, .. } => target,
            Self::Effect { effect } => effect.as_str(),
        }
    }
}
