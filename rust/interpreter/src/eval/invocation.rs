//! Executable invocation.
//!
//! Sets up a child environment containing the captured module
//! environment, binds positional parameters, pushes an `exe` capability
//! context, runs the executable's body, and tears everything down.

use std::sync::Arc;

use async_recursion::async_recursion;
use indexmap::IndexMap;
use mlld_ast::{CodeLanguage, ExeBody};
use mlld_security::{CapabilityContext, CapabilityKind, SecurityDescriptor};
use mlld_variables::Variable;

use crate::env::Environment;
use crate::error::{MlldError, MlldResult};
use crate::eval::value::RuntimeValue;
use crate::interpolate::{self, InterpolationContext};

/// Invoke `@name(args)` and return its result.
///
/// # Errors
///
/// Lookup miss, non-executable target, body execution failures.
#[async_recursion]
pub async fn invoke_executable(
    env: &Arc<Environment>,
    name: &str,
    args: Vec<RuntimeValue>,
) -> MlldResult<RuntimeValue> {
    let variable = env
        .get_variable(name)
        .ok_or_else(|| MlldError::VariableResolution {
            name: name.to_string(),
            context: "executable is not defined".to_string(),
        })?;
    let def = variable
        .executable_def()
        .ok_or_else(|| MlldError::VariableResolution {
            name: name.to_string(),
            context: format!("@{name} is a {} variable, not an executable", variable.kind.name()),
        })?
        .clone();

    let child = env.create_child(None);
    if let Some(key) = &def.module_env_key {
        child.attach_module_env(key.clone());
        // The module's shadow tables travel with its executables; an
        // explicit capture list restricts which languages come along.
        if let Some(module_env) = env.root_state()?.module_env(key) {
            let shadow = module_env.shadow_snapshot();
            if def.captured_shadow.is_empty() {
                child.merge_shadow(&shadow);
            } else {
                child.merge_shadow(&shadow.capture(&def.captured_shadow));
            }
        }
    }

    for (param, arg) in def.params.iter().zip(args.iter()) {
        child.set_parameter_variable(param, argument_variable(param, arg)?);
    }

    child.push_security_context(CapabilityContext::new(
        CapabilityKind::Exe,
        SecurityDescriptor::from_source(format!("exe:@{name}")),
    ));
    let result = run_body(&child, &def.body, &def.params, &args).await;
    let balanced = child.pop_security_context();
    env.release_child(&child);
    balanced?;
    result
}

async fn run_body(
    child: &Arc<Environment>,
    body: &ExeBody,
    params: &[String],
    args: &[RuntimeValue],
) -> MlldResult<RuntimeValue> {
    match body {
        ExeBody::Command { nodes } => {
            let command =
                interpolate::interpolate(child, nodes, InterpolationContext::ShellCommand).await?;
            let result = child.execute_command(&command).await?;
            if result.exit_code != 0 {
                return Err(MlldError::CommandExecution {
                    command,
                    stderr: result.stderr,
                    exit_code: result.exit_code,
                    duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Ok(RuntimeValue::Text(trim_trailing_newline(result.stdout)))
        }
        ExeBody::Code {
            lang: CodeLanguage::Sh,
            source,
        } => {
            let result = child.execute_command(source).await?;
            if result.exit_code != 0 {
                return Err(MlldError::CommandExecution {
                    command: source.clone(),
                    stderr: result.stderr,
                    exit_code: result.exit_code,
                    duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Ok(RuntimeValue::Text(trim_trailing_newline(result.stdout)))
        }
        ExeBody::Code { lang, source } => {
            let mut bindings = IndexMap::new();
            for (param, arg) in params.iter().zip(args.iter()) {
                bindings.insert(param.clone(), arg.to_json());
            }
            let value = child.execute_code(*lang, source, bindings).await?;
            Ok(RuntimeValue::Json(value))
        }
        ExeBody::Template { nodes } => Ok(RuntimeValue::Text(
            interpolate::interpolate(child, nodes, InterpolationContext::Template).await?,
        )),
    }
}

fn argument_variable(param: &str, arg: &RuntimeValue) -> MlldResult<Variable> {
    let variable = match arg {
        RuntimeValue::Text(text) => Variable::simple_text(
            param,
            text.clone(),
            mlld_variables::VariableSource::new(
                mlld_variables::SourceDirective::Parameter,
                mlld_variables::SyntaxForm::Literal,
            ),
        ),
        other => Variable::computed(param, other.to_json()),
    };
    variable.map_err(|err| MlldError::internal(err.to_string()))
}

fn trim_trailing_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
