//! `/var`, `/exe`, and `/path`.

use std::sync::Arc;

use mlld_ast::{
    AssignOp, ExeBody, ExeDirective, Node, PathDirective, Span, ValueExpr, VarDirective,
};
use mlld_security::RawPath;
use mlld_variables::{
    DataValue, SourceDirective, SyntaxForm, Variable, VariableKind, VariableSource,
};

use crate::env::Environment;
use crate::error::{MlldError, MlldResult};
use crate::eval::value::{self, RuntimeValue};
use crate::interpolate::{self, InterpolationContext};
use crate::shadow::ShadowFunction;

/// `/var @name = value` and `/var @name += value`.
///
/// # Errors
///
/// Redefinition, immutability, and evaluation errors.
pub async fn eval_var(env: &Arc<Environment>, directive: &VarDirective, span: Span) -> MlldResult<()> {
    match directive.op {
        AssignOp::Assign => {
            let variable = build_variable(env, &directive.name, &directive.value).await?;
            env.set_variable(&directive.name, variable.defined_at(span))
        }
        AssignOp::Append => eval_append(env, directive, span).await,
    }
}

/// Build a variable from a value expression. Object and array literals
/// keep non-primitive entries as deferred AST fragments; everything else
/// evaluates eagerly.
async fn build_variable(
    env: &Arc<Environment>,
    name: &str,
    expr: &ValueExpr,
) -> MlldResult<Variable> {
    let map_err =
        |err: mlld_variables::VariableConstructionError| MlldError::internal(err.to_string());
    match expr {
        ValueExpr::Primitive { value } => match value {
            mlld_ast::Primitive::String(text) => Variable::simple_text(
                name,
                text.clone(),
                VariableSource::new(SourceDirective::Var, SyntaxForm::Literal),
            )
            .map_err(map_err),
            other => {
                let primitive = match other {
                    mlld_ast::Primitive::Null => mlld_variables::PrimitiveValue::Null,
                    mlld_ast::Primitive::Bool(b) => mlld_variables::PrimitiveValue::Bool(*b),
                    mlld_ast::Primitive::Number(n) => mlld_variables::PrimitiveValue::Number(*n),
                    mlld_ast::Primitive::String(_) => unreachable!(),
                };
                Variable::primitive(
                    name,
                    primitive,
                    VariableSource::new(SourceDirective::Var, SyntaxForm::Literal),
                )
                .map_err(map_err)
            }
        },
        ValueExpr::Template { nodes } => {
            let source =
                VariableSource::new(SourceDirective::Var, SyntaxForm::Template).with_interpolation();
            if nodes.iter().all(|node| matches!(node, Node::Text(_))) {
                // No interpolation needed; store the flattened text.
                let text =
                    interpolate::interpolate(env, nodes, InterpolationContext::Template).await?;
                Variable::simple_text(name, text, source).map_err(map_err)
            } else {
                Variable::template(name, nodes.clone(), source).map_err(map_err)
            }
        }
        ValueExpr::Object { entries } => {
            let entries = entries
                .iter()
                .map(|(key, inner)| (key.clone(), expr_to_data_value(inner)))
                .collect();
            Variable::object(
                name,
                entries,
                VariableSource::new(SourceDirective::Var, SyntaxForm::Object),
            )
            .map_err(map_err)
        }
        ValueExpr::Array { items } => {
            let items = items.iter().map(expr_to_data_value).collect();
            Variable::array(
                name,
                items,
                VariableSource::new(SourceDirective::Var, SyntaxForm::Array),
            )
            .map_err(map_err)
        }
        ValueExpr::Load { reference } => {
            let evaluated = value::evaluate_value_expr(env, expr, 0).await?;
            let source = VariableSource::new(SourceDirective::Var, SyntaxForm::Load);
            // A single section extraction keeps its section name.
            if let Some(section) = &reference.section
                && let RuntimeValue::LoadResults(results) = &evaluated
                && let [single] = results.as_slice()
            {
                return Ok(Variable {
                    name: name.to_string(),
                    kind: VariableKind::SectionText {
                        text: single.content.clone(),
                        section: section.clone(),
                    },
                    source,
                    metadata: mlld_variables::VariableMetadata::default(),
                });
            }
            value::runtime_value_to_variable(name, &evaluated, source)
        }
        other => {
            let evaluated = value::evaluate_value_expr(env, other, 0).await?;
            value::runtime_value_to_variable(
                name,
                &evaluated,
                VariableSource::new(SourceDirective::Var, SyntaxForm::Reference),
            )
        }
    }
}

fn expr_to_data_value(expr: &ValueExpr) -> DataValue {
    match expr {
        ValueExpr::Primitive { value } => DataValue::evaluated(value.to_json()),
        other => DataValue::deferred(other.clone()),
    }
}

/// `+=` appends to a mutable simple-text or array binding, copying on
/// write.
async fn eval_append(
    env: &Arc<Environment>,
    directive: &VarDirective,
    span: Span,
) -> MlldResult<()> {
    let existing = env
        .get_variable(&directive.name)
        .ok_or_else(|| MlldError::VariableResolution {
            name: directive.name.clone(),
            context: "+= target is not defined".to_string(),
        })?;
    if existing.metadata.immutable {
        return Err(MlldError::ImmutableViolation {
            name: directive.name.clone(),
        });
    }

    let addition = value::evaluate_value_expr(env, &directive.value, 0).await?;
    let updated = match &existing.kind {
        VariableKind::SimpleText { text } => {
            let mut combined = text.clone();
            combined.push_str(&interpolate::to_context_string(
                &addition,
                InterpolationContext::Default,
            ));
            Variable::simple_text(&directive.name, combined, existing.source)
                .map_err(|err| MlldError::internal(err.to_string()))?
        }
        VariableKind::Array { items, .. } => {
            let mut items = items.clone();
            match addition.to_json() {
                serde_json::Value::Array(new_items) => {
                    items.extend(new_items.into_iter().map(DataValue::evaluated));
                }
                single => items.push(DataValue::evaluated(single)),
            }
            Variable::array(&directive.name, items, existing.source)
                .map_err(|err| MlldError::internal(err.to_string()))?
        }
        _ => {
            return Err(MlldError::VariableResolution {
                name: directive.name.clone(),
                context: format!("+= is not supported on {} variables", existing.kind.name()),
            });
        }
    };
    env.update_variable(&directive.name, updated.defined_at(span))
}

/// `/exe @name(params) = body` declares an executable. A js/node body is
/// also entered into the matching shadow table so sibling code can call
/// it.
///
/// # Errors
///
/// Redefinition and constructor errors.
pub fn eval_exe(env: &Arc<Environment>, directive: &ExeDirective, span: Span) -> MlldResult<()> {
    let mut variable = Variable::executable(
        &directive.name,
        directive.params.clone(),
        directive.body.clone(),
        VariableSource::new(SourceDirective::Exe, SyntaxForm::Code),
    )
    .map_err(|err| MlldError::internal(err.to_string()))?;

    if let VariableKind::Executable { def } = &mut variable.kind {
        def.captured_shadow = directive.captures.clone();
    }

    if let ExeBody::Code { lang, source } = &directive.body
        && *lang != mlld_ast::CodeLanguage::Sh
    {
        env.define_shadow(
            lang.as_str(),
            ShadowFunction {
                name: directive.name.clone(),
                params: directive.params.clone(),
                source: source.clone(),
            },
        );
    }

    env.set_variable(&directive.name, variable.defined_at(span))
}

/// `/path @name = value` validates and binds a path variable.
///
/// # Errors
///
/// Path policy violations and redefinition.
pub async fn eval_path(
    env: &Arc<Environment>,
    directive: &PathDirective,
    span: Span,
) -> MlldResult<()> {
    let evaluated = value::evaluate_value_expr(env, &directive.value, 0).await?;
    let text = match &evaluated {
        RuntimeValue::Text(text) => text.clone(),
        other => interpolate::to_context_string(other, InterpolationContext::Path),
    };

    let raw = RawPath::new(text.as_str());
    let variable = if raw.is_url() {
        Variable::path(
            &directive.name,
            text,
            true,
            true,
            VariableSource::new(SourceDirective::Path, SyntaxForm::Literal),
        )
        .map_err(|err| MlldError::internal(err.to_string()))?
    } else {
        let root = env.root_state()?;
        let ctx = mlld_security::ValidationContext {
            working_dir: env.file_dir(),
            allow_external: root.config.allow_absolute_paths,
            allow_absolute: root.config.allow_absolute_paths,
            allow_relative: true,
            allow_parent_traversal: true,
            allow_urls: false,
        };
        let validated = mlld_security::PathValidator.validate(&raw, &ctx)?;
        Variable::path(
            &directive.name,
            validated.validated_path.as_path().display().to_string(),
            false,
            validated.is_absolute,
            VariableSource::new(SourceDirective::Path, SyntaxForm::Literal),
        )
        .map_err(|err| MlldError::internal(err.to_string()))?
    };
    env.set_variable(&directive.name, variable.defined_at(span))
}
