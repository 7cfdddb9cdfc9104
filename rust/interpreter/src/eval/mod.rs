//! The directive evaluator: a recursive tree-walk over document nodes.
//!
//! Markdown content is appended verbatim to the document output;
//! directives dispatch to their evaluators, each pushing a capability
//! context on entry and popping it on exit. Errors are annotated with the
//! current file and the offending node's span on the way out.

pub mod control;
pub mod import;
pub mod invocation;
pub mod run;
pub mod show;
pub mod value;
pub mod var;

use std::sync::Arc;

use async_recursion::async_recursion;
use mlld_ast::{Directive, DirectiveKind, Frontmatter, Node};
use mlld_security::{CapabilityContext, CapabilityKind, SecurityDescriptor};
use mlld_variables::{SourceDirective, SyntaxForm, Variable, VariableMetadata, VariableSource};

use crate::effects::Effect;
use crate::env::Environment;
use crate::error::MlldResult;
use crate::interpolate::{self, InterpolationContext};

/// Evaluate a whole document: frontmatter binding, then the node walk.
///
/// # Errors
///
/// The first directive error, annotated with file and span.
pub async fn evaluate_document(env: &Arc<Environment>, nodes: &[Node]) -> MlldResult<()> {
    let mut rest = nodes;
    if let Some(Node::Frontmatter(frontmatter)) = nodes.first() {
        bind_frontmatter(env, frontmatter)?;
        rest = &nodes[1..];
    }
    evaluate_nodes(env, rest).await
}

/// Walk a node list, emitting Markdown verbatim and dispatching
/// directives in source order.
///
/// # Errors
///
/// See [`evaluate_document`].
#[async_recursion]
pub async fn evaluate_nodes(env: &Arc<Environment>, nodes: &[Node]) -> MlldResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => {
                env.add_node(node.clone());
                env.emit_effect(Effect::doc(&text.content).with_source(text.span));
            }
            Node::Newline(newline) => {
                env.add_node(node.clone());
                env.emit_effect(Effect::doc("\n").with_source(newline.span));
            }
            Node::CodeFence(fence) => {
                env.add_node(node.clone());
                env.emit_effect(Effect::doc(&fence.content).with_source(fence.span));
            }
            Node::Comment(_) => {}
            // Only a leading frontmatter node binds; stray ones are inert.
            Node::Frontmatter(_) => {}
            Node::MlldRunBlock(block) => {
                evaluate_nodes(env, &block.nodes).await?;
            }
            Node::Directive(directive) => {
                evaluate_directive(env, directive).await.map_err(|err| {
                    err.at(
                        env.file_path().unwrap_or_else(|| "<document>".to_string()),
                        directive.span,
                    )
                })?;
            }
            Node::VariableReference(reference) => {
                if reference.span.is_placeholder() {
                    continue;
                }
                let resolved = value::resolve_reference(env, reference, 0).await?;
                let text =
                    interpolate::to_context_string(&resolved, InterpolationContext::Markdown);
                env.add_node(Node::text(text.clone()));
                env.emit_effect(Effect::doc(text).with_source(reference.span));
            }
            Node::ExecInvocation(invocation) => {
                let mut args = Vec::with_capacity(invocation.args.len());
                for arg in &invocation.args {
                    args.push(value::evaluate_value_expr(env, arg, 0).await?);
                }
                let result = invocation::invoke_executable(env, &invocation.target, args).await?;
                let result =
                    value::apply_pipes(env, result, &invocation.pipes, &invocation.target, None)
                        .await?;
                let text = interpolate::to_context_string(&result, InterpolationContext::Markdown);
                env.add_node(Node::text(text.clone()));
                env.emit_effect(Effect::doc(text).with_source(invocation.span));
            }
            Node::FileReference(reference) => {
                let loaded = value::load_file_reference(env, reference, 0).await?;
                let text = interpolate::to_context_string(&loaded, InterpolationContext::Markdown);
                env.add_node(Node::text(text.clone()));
                env.emit_effect(Effect::doc(text).with_source(reference.span));
            }
        }
    }
    Ok(())
}

/// Dispatch one directive under its capability context.
///
/// # Errors
///
/// The directive's own failure, or an internal error for an unbalanced
/// capability stack.
pub async fn evaluate_directive(env: &Arc<Environment>, directive: &Directive) -> MlldResult<()> {
    let kind = capability_kind(&directive.kind);
    let mut capability = CapabilityContext::new(
        kind,
        SecurityDescriptor::from_source(format!("directive:/{}", directive.name())),
    );
    capability.operation = Some(directive.name().to_string());
    env.push_security_context(capability);

    let op = crate::context::OpContext {
        directive: directive.name().to_string(),
        operation: directive.name().to_string(),
    };
    let result = env.with_op_context(op, dispatch(env, directive)).await;
    let balanced = env.pop_security_context();
    result?;
    balanced?;
    Ok(())
}

fn capability_kind(kind: &DirectiveKind) -> CapabilityKind {
    match kind {
        DirectiveKind::Run(_) => CapabilityKind::Run,
        DirectiveKind::Import(_) => CapabilityKind::Import,
        DirectiveKind::Output(_) => CapabilityKind::Output,
        DirectiveKind::Guard(_) => CapabilityKind::Guard,
        DirectiveKind::Exe(_) => CapabilityKind::Exe,
        _ => CapabilityKind::Effect,
    }
}

async fn dispatch(env: &Arc<Environment>, directive: &Directive) -> MlldResult<()> {
    tracing::debug!(directive = directive.name(), "evaluating directive");
    match &directive.kind {
        DirectiveKind::Var(var) => var::eval_var(env, var, directive.span).await,
        DirectiveKind::Exe(exe) => var::eval_exe(env, exe, directive.span),
        DirectiveKind::Path(path) => var::eval_path(env, path, directive.span).await,
        DirectiveKind::Run(run) => run::eval_run(env, run).await,
        DirectiveKind::Show(show) => show::eval_show(env, show).await,
        DirectiveKind::Output(output) => show::eval_output(env, output).await,
        DirectiveKind::Import(import) => import::eval_import(env, import).await,
        DirectiveKind::Export(export) => {
            env.record_exports(&export.names);
            Ok(())
        }
        DirectiveKind::When(when) => control::eval_when(env, when).await,
        DirectiveKind::For(for_directive) => control::eval_for(env, for_directive).await,
        DirectiveKind::Guard(guard) => {
            env.guards().register(guard.clone());
            Ok(())
        }
    }
}

fn bind_frontmatter(env: &Arc<Environment>, frontmatter: &Frontmatter) -> MlldResult<()> {
    let decoded: serde_json::Value = match serde_yaml::from_str(&frontmatter.content) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "frontmatter failed to decode, binding null");
            serde_json::Value::Null
        }
    };
    for name in ["fm", "frontmatter"] {
        let variable = Variable::computed(name, decoded.clone())
            .map_err(|err| crate::error::MlldError::internal(err.to_string()))?
            .with_metadata(VariableMetadata {
                immutable: true,
                ..VariableMetadata::default()
            });
        let variable = Variable {
            source: VariableSource::new(SourceDirective::Frontmatter, SyntaxForm::Object),
            ..variable
        };
        env.set_variable(name, variable)?;
    }
    Ok(())
}
