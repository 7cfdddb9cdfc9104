//! `/when` and `/for`.

use std::sync::Arc;

use mlld_ast::{ForDirective, WhenCondition, WhenDirective};
use mlld_variables::{SourceDirective, SyntaxForm, VariableSource};

use crate::env::Environment;
use crate::error::MlldResult;
use crate::eval::value::{self, RuntimeValue};

/// `/when condition => actions` arms, first match wins unless `all` is
/// set. Actions evaluate in a child scope that merges back (no scope
/// boundary intended). A `denied` arm consumes the pending denial.
///
/// # Errors
///
/// Condition-evaluation and action errors.
pub async fn eval_when(env: &Arc<Environment>, directive: &WhenDirective) -> MlldResult<()> {
    for arm in &directive.arms {
        let matched = match &arm.condition {
            WhenCondition::Expr { expr } => {
                value::evaluate_value_expr(env, expr, 0).await?.is_truthy()
            }
            WhenCondition::Denied => env.context().peek_denied().is_some(),
            WhenCondition::Otherwise => true,
        };
        if !matched {
            continue;
        }
        if matches!(arm.condition, WhenCondition::Denied) {
            let denied = env.context().take_denied();
            tracing::debug!(guard = ?denied.as_ref().map(|d| d.guard.clone()), "when denied arm matched");
        }

        let child = env.create_child(None);
        let result = crate::eval::evaluate_nodes(&child, &arm.actions).await;
        match result {
            Ok(()) => env.merge_child(&child),
            Err(err) => {
                env.release_child(&child);
                return Err(err);
            }
        }

        if !directive.all {
            break;
        }
    }
    Ok(())
}

/// `/for @x in iterable => body` runs the body once per element in a
/// child scope. Loaded-file elements set the current iteration file so
/// `<>` resolves inside the body.
///
/// # Errors
///
/// Iterable-evaluation and body errors.
pub async fn eval_for(env: &Arc<Environment>, directive: &ForDirective) -> MlldResult<()> {
    let iterable = value::evaluate_value_expr(env, &directive.iterable, 0).await?;

    match iterable {
        RuntimeValue::LoadResults(results) => {
            for result in results {
                let child = env.create_child(None);
                child.set_current_iteration_file(Some(result.path.clone()));
                let element = RuntimeValue::Text(result.content.clone());
                run_iteration(env, &child, directive, &element).await?;
            }
        }
        other => {
            let items = match other.to_json() {
                serde_json::Value::Array(items) => items,
                single => vec![single],
            };
            for item in items {
                let child = env.create_child(None);
                let element = RuntimeValue::Json(item);
                run_iteration(env, &child, directive, &element).await?;
            }
        }
    }
    Ok(())
}

async fn run_iteration(
    env: &Arc<Environment>,
    child: &Arc<Environment>,
    directive: &ForDirective,
    element: &RuntimeValue,
) -> MlldResult<()> {
    let variable = value::runtime_value_to_variable(
        &directive.binding,
        element,
        VariableSource::new(SourceDirective::For, SyntaxForm::Reference),
    )?;
    child.set_parameter_variable(&directive.binding, variable);

    let result = crate::eval::evaluate_nodes(child, &directive.body).await;
    // Iteration output joins the surrounding document, but the scope is
    // a real boundary: bindings stay behind when the child is torn down.
    if result.is_ok() {
        for node in child.document_nodes() {
            env.add_node(node);
        }
    }
    env.release_child(child);
    result
}
