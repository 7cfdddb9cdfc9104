//! `/show` and `/output`.

use std::sync::Arc;

use mlld_ast::{Node, OutputDirective, OutputTarget, ShowDirective};
use mlld_security::{PathValidator, RawPath, ValidationContext};

use crate::effects::{Effect, FileMode};
use crate::env::Environment;
use crate::error::MlldResult;
use crate::eval::value;
use crate::interpolate::{self, InterpolationContext};

/// `/show value` renders a value into the document, followed by a
/// newline. A guard denial raised while evaluating the value suppresses
/// the emission; the denial stays pending for `when denied` arms.
///
/// # Errors
///
/// Evaluation errors from the value expression.
pub async fn eval_show(env: &Arc<Environment>, directive: &ShowDirective) -> MlldResult<()> {
    let denied_before = env.context().peek_denied();
    let evaluated = value::evaluate_value_expr(env, &directive.value, 0).await?;
    let denied_after = env.context().peek_denied();
    if denied_after.is_some() && denied_after != denied_before {
        tracing::debug!("show suppressed by guard denial");
        return Ok(());
    }

    let text = interpolate::to_context_string(&evaluated, InterpolationContext::Markdown);
    let line = format!("{text}\n");
    env.add_node(Node::text(line.clone()));
    env.emit_effect(Effect::doc(line));
    Ok(())
}

/// `/output value to target` routes a value to stdout, stderr, or a
/// file.
///
/// # Errors
///
/// Evaluation and path-validation errors.
pub async fn eval_output(env: &Arc<Environment>, directive: &OutputDirective) -> MlldResult<()> {
    let denied_before = env.context().peek_denied();
    let evaluated = value::evaluate_value_expr(env, &directive.value, 0).await?;
    let denied_after = env.context().peek_denied();
    if denied_after.is_some() && denied_after != denied_before {
        return Ok(());
    }

    let content = interpolate::to_context_string(&evaluated, InterpolationContext::Default);
    match &directive.target {
        OutputTarget::Stdout => env.emit_effect(Effect::stdout(format!("{content}\n"))),
        OutputTarget::Stderr => env.emit_effect(Effect::stderr(format!("{content}\n"))),
        OutputTarget::File { path, append } => {
            let raw = value::evaluate_value_expr(env, path, 0).await?;
            let path_text = interpolate::to_context_string(&raw, InterpolationContext::Path);
            let root = env.root_state()?;
            let ctx = ValidationContext {
                working_dir: env.file_dir(),
                allow_external: root.config.allow_absolute_paths,
                allow_absolute: root.config.allow_absolute_paths,
                allow_relative: true,
                allow_parent_traversal: true,
                allow_urls: false,
            };
            let validated = PathValidator.validate(&RawPath::new(path_text.as_str()), &ctx)?;
            let mode = if *append {
                FileMode::Append
            } else {
                FileMode::Overwrite
            };
            env.emit_effect(Effect::file(
                validated.validated_path.as_path(),
                content,
                mode,
            ));
        }
    }
    Ok(())
}
