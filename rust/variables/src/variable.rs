//! The [`Variable`] record, constructors, and predicates.

use indexmap::IndexMap;
use mlld_ast::{ExeBody, Node, Span};
use serde::{Deserialize, Serialize};

use crate::kind::{
    CommandDef, DataValue, ExecutableDef, ImportDescriptor, PipelineInputOrigin, PrimitiveValue,
    VariableKind,
};
use crate::metadata::{SourceDirective, SyntaxForm, VariableMetadata, VariableSource};

/// A constructor rejected its inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableConstructionError {
    #[error("variable name cannot be empty")]
    EmptyName,

    #[error("executable @{name} has duplicate parameter {param}")]
    DuplicateParameter { name: String, param: String },

    #[error("path variable @{name} has an empty resolved path")]
    EmptyPath { name: String },
}

/// A named value in an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub source: VariableSource,
    pub metadata: VariableMetadata,
}

impl Variable {
    fn build(
        name: impl Into<String>,
        kind: VariableKind,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        let name = name.into();
        if name.is_empty() {
            return Err(VariableConstructionError::EmptyName);
        }
        Ok(Self {
            name,
            kind,
            source,
            metadata: VariableMetadata::default(),
        })
    }

    /// Stamp the definition location.
    #[must_use]
    pub fn defined_at(mut self, span: Span) -> Self {
        self.metadata.defined_at = Some(span);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: VariableMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// `/var @t = "plain text"`
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn simple_text(
        name: impl Into<String>,
        text: impl Into<String>,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        Self::build(name, VariableKind::SimpleText { text: text.into() }, source)
    }

    /// `/var @n = 3` / `true` / `null`
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn primitive(
        name: impl Into<String>,
        value: PrimitiveValue,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        Self::build(name, VariableKind::Primitive { value }, source)
    }

    /// A template kept as nodes for later interpolation.
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn template(
        name: impl Into<String>,
        nodes: Vec<Node>,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        Self::build(name, VariableKind::Template { nodes }, source)
    }

    /// An object; `is_complex` is derived from the entries.
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn object(
        name: impl Into<String>,
        entries: IndexMap<String, DataValue>,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        let is_complex = entries.values().any(DataValue::is_deferred);
        Self::build(
            name,
            VariableKind::Object {
                entries,
                is_complex,
            },
            source,
        )
    }

    /// An array; `is_complex` is derived from the items.
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn array(
        name: impl Into<String>,
        items: Vec<DataValue>,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        let is_complex = items.iter().any(DataValue::is_deferred);
        Self::build(name, VariableKind::Array { items, is_complex }, source)
    }

    /// `/path @p = ...`
    ///
    /// # Errors
    ///
    /// Fails on an empty name or empty resolved path.
    pub fn path(
        name: impl Into<String>,
        resolved: impl Into<String>,
        is_url: bool,
        is_absolute: bool,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        let name = name.into();
        let resolved = resolved.into();
        if resolved.is_empty() {
            return Err(VariableConstructionError::EmptyPath { name });
        }
        Self::build(
            name,
            VariableKind::Path {
                resolved,
                is_url,
                is_absolute,
            },
            source,
        )
    }

    /// `/exe @f(a, b) = ...`
    ///
    /// # Errors
    ///
    /// Fails on an empty name or duplicate parameter names.
    pub fn executable(
        name: impl Into<String>,
        params: Vec<String>,
        body: ExeBody,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        let name = name.into();
        for (i, param) in params.iter().enumerate() {
            if params[..i].contains(param) {
                return Err(VariableConstructionError::DuplicateParameter {
                    name,
                    param: param.clone(),
                });
            }
        }
        Self::build(
            name,
            VariableKind::Executable {
                def: ExecutableDef {
                    params,
                    body,
                    captured_shadow: Vec::new(),
                    module_env_key: None,
                },
            },
            source,
        )
    }

    /// A command variable (`command-template` or `code-template`).
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn command(
        name: impl Into<String>,
        def: CommandDef,
        source: VariableSource,
    ) -> Result<Self, VariableConstructionError> {
        Self::build(name, VariableKind::Command { def }, source)
    }

    /// The stage input synthesized for each pipeline stage.
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn pipeline_input(
        name: impl Into<String>,
        text: impl Into<String>,
        structured: Option<serde_json::Value>,
        origin: PipelineInputOrigin,
    ) -> Result<Self, VariableConstructionError> {
        Self::build(
            name,
            VariableKind::PipelineInput {
                text: text.into(),
                structured,
                origin,
            },
            VariableSource::new(SourceDirective::Pipeline, SyntaxForm::Literal),
        )
    }

    /// Wrap an existing kind as an imported binding.
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn imported(
        name: impl Into<String>,
        inner: VariableKind,
        import: ImportDescriptor,
    ) -> Result<Self, VariableConstructionError> {
        Self::build(
            name,
            VariableKind::Imported {
                inner: Box::new(inner),
                import,
            },
            VariableSource::new(SourceDirective::Import, SyntaxForm::Reference),
        )
    }

    /// A value computed by a function resolver.
    ///
    /// # Errors
    ///
    /// Fails on an empty name.
    pub fn computed(
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<Self, VariableConstructionError> {
        Self::build(
            name,
            VariableKind::Computed { value },
            VariableSource::new(SourceDirective::Builtin, SyntaxForm::Literal),
        )
    }

    // -- Predicates -------------------------------------------------------
    //
    // Each kind satisfies exactly one of the major predicates; is_object
    // and is_array refine is_structured.

    #[must_use]
    pub fn is_text_like(&self) -> bool {
        matches!(
            self.kind,
            VariableKind::SimpleText { .. }
                | VariableKind::Template { .. }
                | VariableKind::SectionText { .. }
        )
    }

    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(
            self.kind,
            VariableKind::Object { .. } | VariableKind::Array { .. }
        )
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self.kind, VariableKind::Object { .. })
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, VariableKind::Array { .. })
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, VariableKind::Primitive { .. })
    }

    #[must_use]
    pub fn is_path(&self) -> bool {
        matches!(self.kind, VariableKind::Path { .. })
    }

    #[must_use]
    pub fn is_pipeline_input(&self) -> bool {
        matches!(self.kind, VariableKind::PipelineInput { .. })
    }

    #[must_use]
    pub fn is_executable(&self) -> bool {
        matches!(self.kind, VariableKind::Executable { .. })
            || matches!(
                &self.kind,
                VariableKind::Imported { inner, .. }
                    if matches!(**inner, VariableKind::Executable { .. })
            )
    }

    #[must_use]
    pub fn is_imported(&self) -> bool {
        matches!(self.kind, VariableKind::Imported { .. })
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        matches!(self.kind, VariableKind::Computed { .. })
    }

    #[must_use]
    pub fn is_command(&self) -> bool {
        matches!(self.kind, VariableKind::Command { .. })
    }

    /// The executable definition, unwrapping an import wrapper.
    #[must_use]
    pub fn executable_def(&self) -> Option<&ExecutableDef> {
        match &self.kind {
            VariableKind::Executable { def } => Some(def),
            VariableKind::Imported { inner, .. } => match inner.as_ref() {
                VariableKind::Executable { def } => Some(def),
                _ => None,
            },
            _ => None,
        }
    }

    /// A short display preview for diagnostics. The full resolution to a
    /// display value lives in the interpreter, which can evaluate deferred
    /// fragments and auto-invoke executables.
    #[must_use]
    pub fn preview_value(&self) -> String {
        match &self.kind {
            VariableKind::Primitive { value } => value.to_json().to_string(),
            VariableKind::SimpleText { text } | VariableKind::SectionText { text, .. } => {
                text.clone()
            }
            VariableKind::Template { nodes } => format!("<template:{} nodes>", nodes.len()),
            VariableKind::Object { entries, .. } => format!("<object:{} keys>", entries.len()),
            VariableKind::Array { items, .. } => format!("<array:{} items>", items.len()),
            VariableKind::Path { resolved, .. } => resolved.clone(),
            VariableKind::PipelineInput { text, .. } => text.clone(),
            VariableKind::Executable { def } => {
                format!("<function({})>", def.params.join(", "))
            }
            VariableKind::Imported { inner, .. } => Self {
                name: self.name.clone(),
                kind: (**inner).clone(),
                source: self.source,
                metadata: self.metadata.clone(),
            }
            .preview_value(),
            VariableKind::Computed { value } => value.to_string(),
            VariableKind::Command { .. } => "<command>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use mlld_ast::values::Primitive;
    use mlld_ast::ValueExpr;
    use pretty_assertions::assert_eq;

    use super::*;

    fn src() -> VariableSource {
        VariableSource::new(SourceDirective::Var, SyntaxForm::Literal)
    }

    #[test]
    fn predicates_are_exclusive_per_kind() {
        let text = Variable::simple_text("t", "hi", src()).expect("valid");
        assert!(text.is_text_like());
        assert!(!text.is_structured());
        assert!(!text.is_primitive());
        assert!(!text.is_executable());

        let object = Variable::object("o", IndexMap::new(), src()).expect("valid");
        assert!(object.is_structured());
        assert!(object.is_object());
        assert!(!object.is_array());
        assert!(!object.is_text_like());
    }

    #[test]
    fn complexity_derived_from_entries() {
        let plain = Variable::array(
            "xs",
            vec![DataValue::evaluated(serde_json::json!(1))],
            src(),
        )
        .expect("valid");
        assert!(matches!(
            plain.kind,
            VariableKind::Array {
                is_complex: false,
                ..
            }
        ));

        let deferred = Variable::array(
            "ys",
            vec![DataValue::deferred(ValueExpr::Primitive {
                value: Primitive::Number(1.0),
            })],
            src(),
        )
        .expect("valid");
        assert!(matches!(
            deferred.kind,
            VariableKind::Array {
                is_complex: true,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_params_rejected() {
        let err = Variable::executable(
            "f",
            vec!["x".into(), "x".into()],
            ExeBody::Code {
                lang: mlld_ast::CodeLanguage::Js,
                source: "return x;".into(),
            },
            VariableSource::new(SourceDirective::Exe, SyntaxForm::Code),
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            VariableConstructionError::DuplicateParameter {
                name: "f".into(),
                param: "x".into(),
            }
        );
    }

    #[test]
    fn imported_executable_still_counts_as_executable() {
        let exec = Variable::executable(
            "f",
            vec!["x".into()],
            ExeBody::Code {
                lang: mlld_ast::CodeLanguage::Js,
                source: "return x;".into(),
            },
            VariableSource::new(SourceDirective::Exe, SyntaxForm::Code),
        )
        .expect("valid");

        let imported = Variable::imported(
            "g",
            exec.kind.clone(),
            ImportDescriptor {
                reference: "@scope/mod".into(),
                resolved: "/project/llm/modules/mod.mld".into(),
                original_name: "f".into(),
            },
        )
        .expect("valid");

        assert!(imported.is_imported());
        assert!(imported.is_executable());
        assert!(imported.executable_def().is_some());
    }
}
