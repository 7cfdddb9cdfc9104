//! Runtime values and value-expression evaluation.
//!
//! Everything a directive computes flows through [`RuntimeValue`]: plain
//! text, JSON data, loaded-file results, or a namespace view. The
//! data-value evaluator resolves deferred AST fragments inside structured
//! variables, bounded by [`MAX_RESOLUTION_DEPTH`] so self-referential
//! data fails with a depth error instead of unwinding the stack.

use std::sync::Arc;

use async_recursion::async_recursion;
use mlld_ast::{FieldAccess, FileReference, ValueExpr, VariableReference};
use mlld_security::{PathValidator, RawPath, SecurityDescriptor, TaintLevel, ValidationContext};
use mlld_variables::{DataValue, Variable, VariableKind};
use serde_json::Value;

use crate::env::Environment;
use crate::error::{MlldError, MlldResult};
use crate::interpolate::{self, InterpolationContext};
use crate::pipeline::{self, PipelineOutcome, StageValue};
use crate::transformers;

/// Resolution budget for deferred data and reference chains.
pub const MAX_RESOLUTION_DEPTH: usize = 32;

/// One loaded file (or URL) with its content and transport view.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadContentResult {
    pub path: String,
    pub content: String,
    pub status: Option<u16>,
}

/// A namespace object as shown to users: frontmatter, data members, and
/// function members with their parameter lists.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceView {
    pub name: String,
    pub frontmatter: Option<Value>,
    pub members: Vec<(String, NamespaceMember)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceMember {
    Value(Value),
    Function { params: Vec<String> },
}

/// A value flowing through evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Text(String),
    Json(Value),
    LoadResults(Vec<LoadContentResult>),
    Namespace(NamespaceView),
}

impl RuntimeValue {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// The JSON view (used for `ctx.input`, code bindings, and guards).
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Json(value) => value.clone(),
            Self::LoadResults(results) => Value::String(
                results
                    .iter()
                    .map(|r| r.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
            Self::Namespace(view) => namespace_to_json(view),
        }
    }

    /// The structured view if this value has one.
    #[must_use]
    pub fn structured(&self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(text) => !text.is_empty(),
            Self::Json(value) => match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Value::String(s) => !s.is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Object(map) => !map.is_empty(),
            },
            Self::LoadResults(results) => !results.is_empty(),
            Self::Namespace(_) => true,
        }
    }
}

#[must_use]
pub fn namespace_to_json(view: &NamespaceView) -> Value {
    let mut map = serde_json::Map::new();
    for (name, member) in &view.members {
        match member {
            NamespaceMember::Value(value) => {
                map.insert(name.clone(), value.clone());
            }
            NamespaceMember::Function { params } => {
                map.insert(
                    name.clone(),
                    Value::String(format!("<function({})>", params.join(", "))),
                );
            }
        }
    }
    Value::Object(map)
}

fn depth_error(name: &str) -> MlldError {
    MlldError::VariableResolution {
        name: name.to_string(),
        context: format!("exceeded max resolution depth of {MAX_RESOLUTION_DEPTH}"),
    }
}

/// Evaluate a value expression to a runtime value.
///
/// # Errors
///
/// Lookup, field-access, load, and depth errors.
#[async_recursion]
pub async fn evaluate_value_expr(
    env: &Arc<Environment>,
    expr: &ValueExpr,
    depth: usize,
) -> MlldResult<RuntimeValue> {
    if depth > MAX_RESOLUTION_DEPTH {
        return Err(depth_error("<expression>"));
    }
    match expr {
        ValueExpr::Primitive { value } => Ok(RuntimeValue::Json(value.to_json())),
        ValueExpr::Template { nodes } => Ok(RuntimeValue::Text(
            interpolate::interpolate(env, nodes, InterpolationContext::Template).await?,
        )),
        ValueExpr::Object { entries } => {
            let mut map = serde_json::Map::new();
            for (key, inner) in entries {
                let value = evaluate_value_expr(env, inner, depth + 1).await?;
                map.insert(key.clone(), value.to_json());
            }
            Ok(RuntimeValue::Json(Value::Object(map)))
        }
        ValueExpr::Array { items } => {
            let mut out = Vec::with_capacity(items.len());
            for inner in items {
                out.push(evaluate_value_expr(env, inner, depth + 1).await?.to_json());
            }
            Ok(RuntimeValue::Json(Value::Array(out)))
        }
        ValueExpr::Reference { reference } => resolve_reference(env, reference, depth + 1).await,
        ValueExpr::Invocation { invocation } => {
            let mut args = Vec::with_capacity(invocation.args.len());
            for arg in &invocation.args {
                args.push(evaluate_value_expr(env, arg, depth + 1).await?);
            }
            let value =
                crate::eval::invocation::invoke_executable(env, &invocation.target, args).await?;
            apply_pipes(env, value, &invocation.pipes, &invocation.target, None).await
        }
        ValueExpr::Load { reference } => load_file_reference(env, reference, depth + 1).await,
        ValueExpr::Pipeline { source, stages } => {
            // The source runs as stage 0 inside the pipeline context, so
            // a downstream `retry` can re-run it.
            match pipeline::run_pipeline_expr(env, source, stages).await? {
                PipelineOutcome::Value(stage) => Ok(stage.value),
                PipelineOutcome::Denied { .. } => Ok(RuntimeValue::Text(String::new())),
            }
        }
    }
}

/// Run condensed pipes over a value; a denial yields the denial outcome
/// recorded in the ambient context and an empty value.
pub(crate) async fn apply_pipes(
    env: &Arc<Environment>,
    value: RuntimeValue,
    pipes: &[mlld_ast::PipeStage],
    label: &str,
    taint: Option<SecurityDescriptor>,
) -> MlldResult<RuntimeValue> {
    if pipes.is_empty() {
        return Ok(value);
    }
    let mut descriptor = env.current_descriptor();
    if let Some(taint) = taint {
        descriptor = descriptor.union(&taint);
    }
    env.context().push_pipe(label);
    let initial = StageValue { descriptor, value };
    let outcome = pipeline::run_pipeline(env, initial, pipes).await;
    env.context().pop_pipe();
    match outcome? {
        PipelineOutcome::Value(stage) => Ok(stage.value),
        PipelineOutcome::Denied { .. } => Ok(RuntimeValue::Text(String::new())),
    }
}

/// Resolve a variable reference: lookup, field access, pipes.
///
/// # Errors
///
/// [`MlldError::VariableResolution`] on lookup miss.
#[async_recursion]
pub async fn resolve_reference(
    env: &Arc<Environment>,
    reference: &VariableReference,
    depth: usize,
) -> MlldResult<RuntimeValue> {
    if depth > MAX_RESOLUTION_DEPTH {
        return Err(depth_error(&reference.identifier));
    }
    let name = &reference.identifier;

    let variable = match env.get_variable(name) {
        Some(variable) => variable,
        None => match env.get_resolver_variable(name).await? {
            Some(variable) => Arc::new(variable),
            None => {
                return Err(MlldError::VariableResolution {
                    name: name.clone(),
                    context: "variable is not defined".to_string(),
                });
            }
        },
    };

    // Field access on a variant parent (transformers, namespaces) selects
    // the dotted variant callable rather than descending into data.
    if let [FieldAccess::Key(field), rest @ ..] = reference.fields.as_slice()
        && let Some(variants) = &variable.metadata.transformer_variants
        && let Some(target) = variants.get(field)
    {
        let mut inner = reference.clone();
        inner.identifier = target.clone();
        inner.fields = rest.to_vec();
        return resolve_reference(env, &inner, depth + 1).await;
    }

    let mut value = resolve_variable_value(env, &variable, depth + 1).await?;

    let mut chain = String::from("@");
    chain.push_str(name);
    for field in &reference.fields {
        value = access_field(value, field, &chain)?;
        chain.push_str(&field.to_string());
    }

    // The source variable's recorded taint rides along into any pipes so
    // guards can see it.
    let taint = env.with_taint(|tracker| tracker.descriptor_of(name).cloned());
    apply_pipes(env, value, &reference.pipes, name, taint).await
}

/// Resolve a variable to its display value.
///
/// Primitives and text-like variables yield their raw value; complex
/// structured variables run the data-value evaluator; executables
/// auto-invoke with no arguments; namespace objects are *not* cleaned
/// here — that happens only at display time.
///
/// # Errors
///
/// Depth and resolution errors from deferred fragments.
#[async_recursion]
pub async fn resolve_variable_value(
    env: &Arc<Environment>,
    variable: &Variable,
    depth: usize,
) -> MlldResult<RuntimeValue> {
    if depth > MAX_RESOLUTION_DEPTH {
        return Err(depth_error(&variable.name));
    }
    match &variable.kind {
        VariableKind::Primitive { value } => Ok(RuntimeValue::Json(value.to_json())),
        VariableKind::SimpleText { text } | VariableKind::SectionText { text, .. } => {
            Ok(RuntimeValue::Text(text.clone()))
        }
        VariableKind::Template { nodes } => Ok(RuntimeValue::Text(
            interpolate::interpolate(env, nodes, InterpolationContext::Template).await?,
        )),
        VariableKind::Object { entries, .. } => {
            let mut map = serde_json::Map::new();
            for (key, entry) in entries {
                map.insert(
                    key.clone(),
                    evaluate_data_value(env, entry, depth + 1, &variable.name).await?,
                );
            }
            Ok(RuntimeValue::Json(Value::Object(map)))
        }
        VariableKind::Array { items, .. } => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate_data_value(env, item, depth + 1, &variable.name).await?);
            }
            Ok(RuntimeValue::Json(Value::Array(out)))
        }
        VariableKind::Path { resolved, .. } => Ok(RuntimeValue::Text(resolved.clone())),
        VariableKind::PipelineInput { text, .. } => Ok(RuntimeValue::Text(text.clone())),
        VariableKind::Executable { def } => {
            if variable.metadata.reserved && transformers::is_transformer(&variable.name) {
                return Ok(RuntimeValue::Text(format!(
                    "<function({})>",
                    def.params.join(", ")
                )));
            }
            if env.is_resolving(&variable.name) {
                return Err(depth_error(&variable.name));
            }
            env.push_resolution(&variable.name);
            let result =
                crate::eval::invocation::invoke_executable(env, &variable.name, Vec::new()).await;
            env.pop_resolution(&variable.name);
            result
        }
        VariableKind::Imported { inner, .. } => {
            let unwrapped = Variable {
                name: variable.name.clone(),
                kind: (**inner).clone(),
                source: variable.source,
                metadata: variable.metadata.clone(),
            };
            resolve_variable_value(env, &unwrapped, depth + 1).await
        }
        VariableKind::Computed { value } => Ok(RuntimeValue::Json(value.clone())),
        VariableKind::Command { .. } => Ok(RuntimeValue::Text("<command>".to_string())),
    }
}

/// Evaluate one structured-variable element.
///
/// # Errors
///
/// Depth and evaluation errors from deferred fragments.
#[async_recursion]
pub async fn evaluate_data_value(
    env: &Arc<Environment>,
    data: &DataValue,
    depth: usize,
    owner: &str,
) -> MlldResult<Value> {
    if depth > MAX_RESOLUTION_DEPTH {
        return Err(depth_error(owner));
    }
    match data {
        DataValue::Evaluated { value } => Ok(value.clone()),
        DataValue::Deferred { expr } => Ok(evaluate_value_expr(env, expr, depth + 1)
            .await?
            .to_json()),
    }
}

/// Apply one field-access step.
///
/// # Errors
///
/// [`MlldError::FieldAccess`] for missing keys, out-of-bounds indices,
/// and access on non-containers.
pub fn access_field(
    value: RuntimeValue,
    field: &FieldAccess,
    chain: &str,
) -> MlldResult<RuntimeValue> {
    let json = match value {
        RuntimeValue::Json(json) => json,
        RuntimeValue::Text(text) => {
            // Fields on string content try a JSON parse first.
            serde_json::from_str(&text).map_err(|_| MlldError::FieldAccess {
                base: "text".to_string(),
                chain: chain.to_string(),
                field: field.to_string(),
            })?
        }
        RuntimeValue::LoadResults(results) => {
            let content = results
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            serde_json::from_str(&content).map_err(|_| MlldError::FieldAccess {
                base: "loaded content".to_string(),
                chain: chain.to_string(),
                field: field.to_string(),
            })?
        }
        RuntimeValue::Namespace(view) => namespace_to_json(&view),
    };

    let result = match (field, &json) {
        (FieldAccess::Key(key), Value::Object(map)) => map.get(key).cloned(),
        (FieldAccess::Index(index), Value::Array(items)) => {
            let index = if *index < 0 {
                items.len().checked_sub(index.unsigned_abs() as usize)
            } else {
                usize::try_from(*index).ok()
            };
            index.and_then(|i| items.get(i).cloned())
        }
        _ => None,
    };

    result
        .map(RuntimeValue::Json)
        .ok_or_else(|| MlldError::FieldAccess {
            base: short_preview(&json),
            chain: chain.to_string(),
            field: field.to_string(),
        })
}

fn short_preview(value: &Value) -> String {
    let text = value.to_string();
    if text.len() > 60 {
        format!("{}…", &text[..60])
    } else {
        text
    }
}

/// Load a `<file>` reference: read, optionally extract a section, apply
/// fields and pipes. The `<>` placeholder resolves to the current
/// iteration file. Circular references warn and yield empty text.
///
/// # Errors
///
/// Path validation and read errors; a missing iteration file for `<>`.
#[async_recursion]
pub async fn load_file_reference(
    env: &Arc<Environment>,
    reference: &FileReference,
    _depth: usize,
) -> MlldResult<RuntimeValue> {
    let path = match &reference.path {
        Some(path) => path.clone(),
        None => env.current_iteration_file().ok_or_else(|| {
            MlldError::VariableResolution {
                name: "<>".to_string(),
                context: "placeholder used outside a /for iteration".to_string(),
            }
        })?,
    };

    if env.is_in_interpolation_stack(&path) {
        tracing::warn!(%path, "circular file reference, yielding empty string");
        return Ok(RuntimeValue::Text(String::new()));
    }

    let root = env.root_state()?;
    let ctx = ValidationContext {
        working_dir: env.file_dir(),
        allow_external: root.config.allow_absolute_paths,
        allow_absolute: root.config.allow_absolute_paths
            || std::path::Path::new(&path).starts_with(&root.config.project_root),
        allow_relative: true,
        allow_parent_traversal: true,
        allow_urls: false,
    };
    let validated = PathValidator.validate(&RawPath::new(path.as_str()), &ctx)?;

    env.push_interpolation_stack(&path);
    let loaded = root
        .fs
        .read_file(&validated.validated_path)
        .await
        .map_err(MlldError::from);
    env.pop_interpolation_stack(&path);
    let mut content = loaded?;

    env.with_taint(|taint| {
        taint.record(
            format!("file:{path}"),
            SecurityDescriptor {
                labels: vec![format!("dir:{}", env.file_dir().display())],
                sources: vec![format!("file:{path}")],
                taint: TaintLevel::None,
                policy_context: None,
            },
        );
    });

    if let Some(section) = &reference.section {
        content = extract_section(&content, section).unwrap_or_default();
    }

    let mut value = if reference.fields.is_empty() {
        RuntimeValue::LoadResults(vec![LoadContentResult {
            path: path.clone(),
            content,
            status: None,
        }])
    } else {
        let mut current = RuntimeValue::Text(content);
        let mut chain = format!("<{path}>");
        for field in &reference.fields {
            current = access_field(current, field, &chain)?;
            chain.push_str(&field.to_string());
        }
        current
    };

    if !reference.pipes.is_empty() {
        let taint = env.with_taint(|tracker| tracker.descriptor_of(&format!("file:{path}")).cloned());
        value = apply_pipes(env, value, &reference.pipes, &path, taint).await?;
    }
    Ok(value)
}

/// Materialize a runtime value as a variable of the matching kind.
///
/// # Errors
///
/// Constructor validation errors.
pub fn runtime_value_to_variable(
    name: &str,
    value: &RuntimeValue,
    source: mlld_variables::VariableSource,
) -> MlldResult<Variable> {
    let map_err = |err: mlld_variables::VariableConstructionError| MlldError::internal(err.to_string());
    match value {
        RuntimeValue::Text(text) => {
            Variable::simple_text(name, text.clone(), source).map_err(map_err)
        }
        RuntimeValue::Json(json) => match json {
            Value::String(text) => {
                Variable::simple_text(name, text.clone(), source).map_err(map_err)
            }
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(key, inner)| (key.clone(), DataValue::evaluated(inner.clone())))
                    .collect();
                Variable::object(name, entries, source).map_err(map_err)
            }
            Value::Array(items) => {
                let items = items.iter().cloned().map(DataValue::evaluated).collect();
                Variable::array(name, items, source).map_err(map_err)
            }
            primitive => {
                let value = match primitive {
                    Value::Null => mlld_variables::PrimitiveValue::Null,
                    Value::Bool(b) => mlld_variables::PrimitiveValue::Bool(*b),
                    Value::Number(n) => {
                        mlld_variables::PrimitiveValue::Number(n.as_f64().unwrap_or(0.0))
                    }
                    _ => mlld_variables::PrimitiveValue::Null,
                };
                Variable::primitive(name, value, source).map_err(map_err)
            }
        },
        RuntimeValue::LoadResults(results) => {
            let joined = results
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            Variable::simple_text(name, joined, source).map_err(map_err)
        }
        RuntimeValue::Namespace(view) => {
            Variable::computed(name, namespace_to_json(view)).map_err(map_err)
        }
    }
}

/// Extract a named `#` section from Markdown: from its heading to the
/// next heading of the same or higher level.
#[must_use]
pub fn extract_section(content: &str, section: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut level = 0usize;
    let mut capturing = false;
    for line in content.lines() {
        let hashes = line.chars().take_while(|c| *c == '#').count();
        if hashes > 0 {
            let title = line[hashes..].trim();
            if capturing && hashes <= level {
                break;
            }
            if !capturing && title.eq_ignore_ascii_case(section) {
                capturing = true;
                level = hashes;
                continue;
            }
        }
        if capturing {
            lines.push(line);
        }
    }
    if capturing {
        Some(lines.join("\n").trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn truthiness() {
        assert!(!RuntimeValue::Text(String::new()).is_truthy());
        assert!(RuntimeValue::Text("x".into()).is_truthy());
        assert!(!RuntimeValue::Json(Value::Null).is_truthy());
        assert!(!RuntimeValue::Json(serde_json::json!(0)).is_truthy());
        assert!(RuntimeValue::Json(serde_json::json!([1])).is_truthy());
    }

    #[test]
    fn field_access_on_text_parses_json() {
        let value = RuntimeValue::Text("{\"name\":\"Alice\"}".into());
        let name = access_field(value, &FieldAccess::Key("name".into()), "@u").expect("field");
        assert_eq!(name, RuntimeValue::Json(serde_json::json!("Alice")));
    }

    #[test]
    fn field_access_misses_are_typed() {
        let value = RuntimeValue::Json(serde_json::json!({"a": 1}));
        let err = access_field(value, &FieldAccess::Key("b".into()), "@o").expect_err("miss");
        assert!(matches!(err, MlldError::FieldAccess { .. }));

        let items = RuntimeValue::Json(serde_json::json!([1, 2]));
        let err = access_field(items, &FieldAccess::Index(5), "@xs").expect_err("oob");
        assert!(matches!(err, MlldError::FieldAccess { .. }));
    }

    #[test]
    fn negative_index_counts_from_end() {
        let items = RuntimeValue::Json(serde_json::json!([1, 2, 3]));
        let last = access_field(items, &FieldAccess::Index(-1), "@xs").expect("last");
        assert_eq!(last, RuntimeValue::Json(serde_json::json!(3)));
    }

    #[test]
    fn section_extraction_stops_at_same_level() {
        let doc = "# Intro\nhello\n\n## Usage\nuse it\n\n# Next\nbye\n";
        assert_eq!(extract_section(doc, "Intro").as_deref(), Some("hello\n\n## Usage\nuse it"));
        assert_eq!(extract_section(doc, "Usage").as_deref(), Some("use it"));
        assert_eq!(extract_section(doc, "Missing"), None);
    }
}
