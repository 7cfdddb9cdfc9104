//! `/run`.

use std::sync::Arc;

use indexmap::IndexMap;
use mlld_ast::{CodeLanguage, ExeBody, Node, RunDirective};

use crate::effects::Effect;
use crate::env::Environment;
use crate::error::{CollectedError, MlldError, MlldResult};
use crate::eval::value::{self, RuntimeValue};
use crate::interpolate::{self, InterpolationContext};

/// `/run {command}` / `/run lang { code }` executes and emits the output
/// into the document. With `collect_errors`, a non-zero exit becomes a
/// deferred [`CollectedError`] and the document continues.
///
/// # Errors
///
/// Command failures (unless collected), interpolation errors, executor
/// failures.
pub async fn eval_run(env: &Arc<Environment>, directive: &RunDirective) -> MlldResult<()> {
    let output = match &directive.body {
        ExeBody::Command { nodes } => {
            let command =
                interpolate::interpolate(env, nodes, InterpolationContext::ShellCommand).await?;
            match run_command(env, &command, directive.collect_errors).await? {
                Some(stdout) => RuntimeValue::Text(stdout),
                None => return Ok(()),
            }
        }
        ExeBody::Code {
            lang: CodeLanguage::Sh,
            source,
        } => match run_command(env, source, directive.collect_errors).await? {
            Some(stdout) => RuntimeValue::Text(stdout),
            None => return Ok(()),
        },
        ExeBody::Code { lang, source } => {
            let result = env.execute_code(*lang, source, IndexMap::new()).await?;
            RuntimeValue::Json(result)
        }
        ExeBody::Template { nodes } => RuntimeValue::Text(
            interpolate::interpolate(env, nodes, InterpolationContext::Template).await?,
        ),
    };

    let denied_before = env.context().peek_denied();
    let output = value::apply_pipes(env, output, &directive.pipes, "run", None).await?;
    let denied_after = env.context().peek_denied();
    if denied_after.is_some() && denied_after != denied_before {
        return Ok(());
    }

    let text = interpolate::to_context_string(&output, InterpolationContext::Markdown);
    if text.is_empty() {
        return Ok(());
    }
    let line = if text.ends_with('\n') {
        text
    } else {
        format!("{text}\n")
    };
    env.add_node(Node::text(line.clone()));
    env.emit_effect(Effect::doc(line));
    Ok(())
}

/// Run a shell command; returns `None` when a failure was collected
/// instead of raised.
async fn run_command(
    env: &Arc<Environment>,
    command: &str,
    collect_errors: bool,
) -> MlldResult<Option<String>> {
    let result = env.execute_command(command).await?;
    if result.exit_code != 0 {
        let duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX);
        if collect_errors {
            env.collect_error(CollectedError {
                command: command.to_string(),
                stderr: result.stderr,
                exit_code: result.exit_code,
                duration_ms,
            })?;
            return Ok(None);
        }
        return Err(MlldError::CommandExecution {
            command: command.to_string(),
            stderr: result.stderr,
            exit_code: result.exit_code,
            duration_ms,
        });
    }
    let mut stdout = result.stdout;
    if stdout.ends_with('\n') {
        stdout.pop();
    }
    Ok(Some(stdout))
}
