//! Interpolation: template nodes to a string.
//!
//! Each node is converted, then the context-specific escaping strategy is
//! applied exactly once per value. Shell contexts are the special case:
//! arrays expand to space-separated tokens, each element escaped
//! independently with no further escaping afterwards.

use std::sync::Arc;

use async_recursion::async_recursion;
use mlld_ast::Node;
use serde_json::Value;

use crate::env::Environment;
use crate::error::MlldResult;
use crate::eval::value::{self, NamespaceMember, RuntimeValue};

/// Where the interpolated string will be spliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationContext {
    #[default]
    Default,
    ShellCommand,
    JavaScript,
    Template,
    Path,
    Markdown,
}

/// Interpolate nodes into a string under the given context.
///
/// # Errors
///
/// Resolution, field-access, and load errors from embedded references.
#[async_recursion]
pub async fn interpolate(
    env: &Arc<Environment>,
    nodes: &[Node],
    ctx: InterpolationContext,
) -> MlldResult<String> {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(&text.content),
            Node::Newline(_) => out.push('\n'),
            Node::Comment(_) => {}
            Node::VariableReference(reference) => {
                // Zero-offset spans are grammar-bug placeholders.
                if reference.span.is_placeholder() {
                    continue;
                }
                let value = value::resolve_reference(env, reference, 0).await?;
                out.push_str(&to_context_string(&value, ctx));
            }
            Node::FileReference(reference) => {
                let value = value::load_file_reference(env, reference, 0).await?;
                out.push_str(&to_context_string(&value, ctx));
            }
            Node::ExecInvocation(invocation) => {
                let mut args = Vec::with_capacity(invocation.args.len());
                for arg in &invocation.args {
                    args.push(value::evaluate_value_expr(env, arg, 0).await?);
                }
                let result =
                    crate::eval::invocation::invoke_executable(env, &invocation.target, args)
                        .await?;
                let result =
                    value::apply_pipes(env, result, &invocation.pipes, &invocation.target, None)
                        .await?;
                out.push_str(&to_context_string(&result, ctx));
            }
            other => {
                tracing::warn!(kind = ?other.span(), "unexpected node in interpolation, skipped");
            }
        }
    }
    Ok(out)
}

/// Convert a runtime value to a string for the given context, applying
/// the context's escaping exactly once.
#[must_use]
pub fn to_context_string(value: &RuntimeValue, ctx: InterpolationContext) -> String {
    match value {
        RuntimeValue::Text(text) => escape_for(text, ctx),
        RuntimeValue::Json(json) => json_to_context_string(json, ctx),
        RuntimeValue::LoadResults(results) => {
            let joined = results
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            escape_for(&joined, ctx)
        }
        RuntimeValue::Namespace(view) => {
            let mut rendered = serde_json::Map::new();
            if let Some(frontmatter) = &view.frontmatter {
                rendered.insert("frontmatter".to_string(), frontmatter.clone());
            }
            for (name, member) in &view.members {
                let value = match member {
                    NamespaceMember::Value(value) => value.clone(),
                    NamespaceMember::Function { params } => {
                        Value::String(format!("<function({})>", params.join(", ")))
                    }
                };
                rendered.insert(name.clone(), value);
            }
            escape_for(&Value::Object(rendered).to_string(), ctx)
        }
    }
}

fn json_to_context_string(json: &Value, ctx: InterpolationContext) -> String {
    match json {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => escape_for(s, ctx),
        Value::Array(items) => {
            if ctx == InterpolationContext::ShellCommand {
                // Each element becomes its own shell token; elements are
                // escaped independently and never re-escaped.
                items
                    .iter()
                    .map(|item| shell_escape(&json_plain_string(item)))
                    .collect::<Vec<_>>()
                    .join(" ")
            } else {
                escape_for(&json.to_string(), ctx)
            }
        }
        Value::Object(_) => escape_for(&json.to_string(), ctx),
    }
}

/// The unescaped display string for a JSON value.
fn json_plain_string(json: &Value) -> String {
    match json {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn escape_for(text: &str, ctx: InterpolationContext) -> String {
    match ctx {
        InterpolationContext::ShellCommand => shell_escape(text),
        InterpolationContext::JavaScript => escape_js(text),
        InterpolationContext::Default
        | InterpolationContext::Template
        | InterpolationContext::Path
        | InterpolationContext::Markdown => text.to_string(),
    }
}

/// Quote a string as a single shell token.
///
/// Plain tokens pass through; anything else is wrapped in double quotes
/// with `\`, `"`, `` ` `` and `$` escaped.
#[must_use]
pub fn shell_escape(token: &str) -> String {
    if token.is_empty() {
        return "\"\"".to_string();
    }
    let plain = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        return token.to_string();
    }
    let mut escaped = String::with_capacity(token.len() + 2);
    escaped.push('"');
    for c in token.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('"');
    escaped
}

fn escape_js(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn shell_arrays_expand_to_escaped_tokens() {
        let value = RuntimeValue::Json(serde_json::json!(["a", "b c", 3]));
        assert_eq!(
            to_context_string(&value, InterpolationContext::ShellCommand),
            "a \"b c\" 3"
        );
    }

    #[test]
    fn arrays_elsewhere_are_compact_json() {
        let value = RuntimeValue::Json(serde_json::json!(["a", "b c"]));
        assert_eq!(
            to_context_string(&value, InterpolationContext::Default),
            "[\"a\",\"b c\"]"
        );
    }

    #[test]
    fn null_renders_as_null() {
        let value = RuntimeValue::Json(Value::Null);
        assert_eq!(to_context_string(&value, InterpolationContext::Default), "null");
    }

    #[test]
    fn load_results_join_with_blank_lines() {
        let value = RuntimeValue::LoadResults(vec![
            value::LoadContentResult {
                path: "a.md".into(),
                content: "first".into(),
                status: None,
            },
            value::LoadContentResult {
                path: "b.md".into(),
                content: "second".into(),
                status: None,
            },
        ]);
        assert_eq!(
            to_context_string(&value, InterpolationContext::Default),
            "first\n\nsecond"
        );
    }

    #[test]
    fn shell_escape_quotes_specials() {
        assert_eq!(shell_escape("plain-token_1"), "plain-token_1");
        assert_eq!(shell_escape("b c"), "\"b c\"");
        assert_eq!(shell_escape("a\"b"), "\"a\\\"b\"");
        assert_eq!(shell_escape("$HOME"), "\"\\$HOME\"");
        assert_eq!(shell_escape(""), "\"\"");
    }
}
