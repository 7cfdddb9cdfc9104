//! Environment and security invariants.

mod common;

use common::{harness, string_lit, var_assign};
use mlld_ast::{ValueExpr, VariableReference};
use mlld_interpreter::MlldError;
use mlld_interpreter::eval::value::{self, RuntimeValue};
use mlld_interpreter::interpolate::{self, InterpolationContext};
use mlld_security::{
    CapabilityContext, CapabilityKind, PolicyConfig, SecurityDescriptor, TaintLevel,
    normalize_policy_config,
};
use mlld_variables::{DataValue, SourceDirective, SyntaxForm, Variable, VariableSource};
use pretty_assertions::assert_eq;

fn src() -> VariableSource {
    VariableSource::new(SourceDirective::Var, SyntaxForm::Literal)
}

#[test_log::test(tokio::test)]
async fn set_then_get_returns_the_same_variable() {
    let h = harness();
    let env = h.interpreter.env();
    let variable = Variable::simple_text("greeting", "hello", src()).expect("valid");
    env.set_variable("greeting", variable.clone()).expect("binds");

    let fetched = env.get_variable("greeting").expect("present");
    assert_eq!(*fetched, variable);
}

#[tokio::test]
async fn redefinition_fails_even_with_identical_value() {
    let h = harness();
    let env = h.interpreter.env();
    let variable = Variable::simple_text("x", "1", src()).expect("valid");
    env.set_variable("x", variable.clone()).expect("first bind");

    let err = env.set_variable("x", variable).expect_err("second bind");
    assert!(matches!(
        err,
        MlldError::VariableRedefinition { reserved: false, .. }
    ));
}

#[tokio::test]
async fn reserved_names_cannot_be_bound() {
    let h = harness();
    let env = h.interpreter.env();
    for name in ["now", "base", "json", "keep"] {
        let err = env
            .set_variable(name, Variable::simple_text(name, "v", src()).expect("valid"))
            .expect_err("reserved");
        assert!(matches!(
            err,
            MlldError::VariableRedefinition { reserved: true, .. }
        ));
    }
}

#[tokio::test]
async fn security_push_pop_restores_the_descriptor() {
    let h = harness();
    let env = h.interpreter.env();
    let before = env.current_descriptor();

    env.push_security_context(CapabilityContext::new(
        CapabilityKind::Run,
        SecurityDescriptor::labeled("net", TaintLevel::Tainted),
    ));
    assert_eq!(env.current_descriptor().taint, TaintLevel::Tainted);

    env.pop_security_context().expect("balanced");
    assert_eq!(env.current_descriptor(), before);

    // One more pop is an unbalanced-stack programmer error.
    let err = env.pop_security_context().expect_err("unbalanced");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn import_stack_guards_circularity() {
    let h = harness();
    let env = h.interpreter.env();
    assert!(!env.is_importing());

    env.begin_import("/project/a.mld").expect("push");
    assert!(env.is_importing());

    let err = env.begin_import("/project/a.mld").expect_err("circular");
    assert_eq!(err.code(), "CIRCULAR_IMPORT");

    env.end_import("/project/a.mld");
    assert!(!env.is_importing());
}

#[tokio::test]
async fn policy_normalization_is_idempotent() {
    let config = PolicyConfig {
        denied_labels: vec!["b".into(), "a".into(), "b".into()],
        approved_hashes: vec!["ff".into(), "aa".into()],
        capability_rules: [("Run".to_string(), vec!["x".to_string(), "x".to_string()])]
            .into_iter()
            .collect(),
    };
    let once = normalize_policy_config(&config);
    assert_eq!(normalize_policy_config(&once), once);
}

#[tokio::test]
async fn empty_interpolation_is_empty_in_every_context() {
    let h = harness();
    let env = h.interpreter.env();
    for ctx in [
        InterpolationContext::Default,
        InterpolationContext::ShellCommand,
        InterpolationContext::JavaScript,
        InterpolationContext::Template,
        InterpolationContext::Path,
        InterpolationContext::Markdown,
    ] {
        let rendered = interpolate::interpolate(env, &[], ctx).await.expect("ok");
        assert_eq!(rendered, "");
    }
}

#[tokio::test]
async fn self_referential_complex_data_hits_the_depth_limit() {
    let h = harness();
    let env = h.interpreter.env();

    // @a = { "self": @a } — the deferred fragment resolves back to @a.
    let entries = [(
        "self".to_string(),
        DataValue::deferred(ValueExpr::Reference {
            reference: VariableReference::new("a"),
        }),
    )]
    .into_iter()
    .collect();
    let variable = Variable::object("a", entries, src()).expect("valid");
    env.set_variable("a", variable.clone()).expect("binds");

    let err = value::resolve_variable_value(env, &variable, 0)
        .await
        .expect_err("depth limit");
    match err.root_kind() {
        MlldError::VariableResolution { context, .. } => {
            assert!(context.contains("depth"), "{context}");
        }
        other => panic!("expected resolution error, got {other:?}"),
    }
}

#[tokio::test]
async fn shell_interpolation_produces_three_tokens() {
    let value = RuntimeValue::Json(serde_json::json!(["a", "b c", 3]));
    let rendered = interpolate::to_context_string(&value, InterpolationContext::ShellCommand);
    assert_eq!(rendered, "a \"b c\" 3");

    // Three argv tokens: `a`, `b c`, `3`.
    let tokens: Vec<&str> = shell_split(&rendered);
    assert_eq!(tokens, vec!["a", "b c", "3"]);
}

/// A minimal double-quote-aware splitter for assertions.
fn shell_split(command: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let bytes = command.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' => i += 1,
            b'"' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != b'"' {
                    end += 1;
                }
                tokens.push(&command[start..end]);
                i = end + 1;
            }
            _ => {
                let start = i;
                while i < bytes.len() && bytes[i] != b' ' {
                    i += 1;
                }
                tokens.push(&command[start..i]);
            }
        }
    }
    tokens
}

#[test_log::test(tokio::test)]
async fn pipeline_context_is_balanced_after_a_run() {
    let h = harness();
    let nodes = vec![
        var_assign("g", string_lit("hello")),
        common::show(common::pipeline(
            ValueExpr::Reference {
                reference: VariableReference::new("g"),
            },
            &["json"],
        )),
    ];
    h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(h.interpreter.env().context().pipeline_depth(), 0);
    assert_eq!(h.document(), "\"hello\"\n");
}

#[tokio::test]
async fn append_copies_on_write_and_respects_immutability() {
    let h = harness();
    let env = h.interpreter.env();

    let nodes = vec![
        var_assign("log", string_lit("a")),
        common::directive(mlld_ast::DirectiveKind::Var(mlld_ast::VarDirective {
            name: "log".to_string(),
            value: string_lit("b"),
            op: mlld_ast::AssignOp::Append,
        })),
    ];
    h.interpreter.run(&nodes).await.expect("evaluates");
    let appended = env.get_variable("log").expect("present");
    assert_eq!(appended.preview_value(), "ab");

    // Immutable bindings refuse mutation.
    let mut frozen = Variable::simple_text("frozen", "x", src()).expect("valid");
    frozen.metadata.immutable = true;
    env.set_variable("frozen", frozen).expect("binds");
    let err = env
        .update_variable(
            "frozen",
            Variable::simple_text("frozen", "y", src()).expect("valid"),
        )
        .expect_err("immutable");
    assert!(matches!(err, MlldError::ImmutableViolation { .. }));
}
