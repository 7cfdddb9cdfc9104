//! End-to-end scenarios: documents built from parsed nodes, evaluated
//! against a memory-backed root environment.

mod common;

use std::sync::{Arc, Mutex, PoisonError};

use common::{
    ClosureCodeExecutor, array, exe, field_ref, harness, harness_with, js_body, number_lit, object,
    pipeline, show, string_lit, template, text, var_assign, var_ref,
};
use mlld_ast::{
    DirectiveKind, ExeBody, GuardCondition, GuardDecisionSpec, GuardDirective, GuardTiming,
    ImportBinding, ImportClause, ImportDirective, Node, RunDirective, WhenArm, WhenCondition,
    WhenDirective,
};
use mlld_interpreter::MlldError;
use mlld_security::{SecurityDescriptor, TaintLevel};
use pretty_assertions::assert_eq;
use serde_json::Value;

#[tokio::test]
async fn text_variable_interpolates_into_document() {
    let h = harness();
    let nodes = vec![
        var_assign("g", string_lit("Hello")),
        show(template(vec![var_ref("g"), text(", World!")])),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "Hello, World!\n");
}

#[tokio::test]
async fn field_access_renders_object_members() {
    let h = harness();
    let nodes = vec![
        var_assign(
            "u",
            object(vec![
                ("name", string_lit("Alice")),
                ("n", number_lit(3.0)),
            ]),
        ),
        show(template(vec![
            field_ref("u", &["name"]),
            text(" x "),
            field_ref("u", &["n"]),
        ])),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "Alice x 3\n");
}

#[tokio::test]
async fn pipeline_retry_reruns_source_and_threads_ctx() {
    let tries_at_success = Arc::new(Mutex::new(Vec::<usize>::new()));
    let seen = tries_at_success.clone();

    let h = harness_with(move |options| {
        options.code_executor = Arc::new(ClosureCodeExecutor::new(move |_lang, source, params| {
            let try_number = params
                .ctx
                .get("try")
                .and_then(Value::as_u64)
                .unwrap_or_default();
            if source.contains("\"v\" + ctx.try") {
                return Ok(Value::String(format!("v{try_number}")));
            }
            // The validating stage: retry until the third attempt.
            if try_number < 3 {
                return Ok(Value::String("retry".to_string()));
            }
            let tries_len = params
                .ctx
                .get("tries")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or_default();
            seen.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(tries_len);
            Ok(params
                .bindings
                .get("x")
                .cloned()
                .unwrap_or(Value::Null))
        }));
    });

    let nodes = vec![
        exe("src", &[], js_body("return \"v\" + ctx.try;")),
        exe(
            "v",
            &["x"],
            js_body("if (ctx.try < 3) return \"retry\"; return x;"),
        ),
        show(pipeline(common::invoke("src"), &["v"])),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "v3\n");
    assert_eq!(
        *tries_at_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner),
        vec![2]
    );
}

#[tokio::test]
async fn circular_import_fails_with_both_paths() {
    let h = harness();
    h.fs.seed("/project/a.mld", "module-a");
    h.fs.seed("/project/b.mld", "module-b");
    h.parser.insert(
        "module-a",
        vec![common::directive(DirectiveKind::Import(ImportDirective {
            reference: "./b.mld".to_string(),
            clause: ImportClause::SideEffect,
        }))],
    );
    h.parser.insert(
        "module-b",
        vec![common::directive(DirectiveKind::Import(ImportDirective {
            reference: "./a.mld".to_string(),
            clause: ImportClause::SideEffect,
        }))],
    );

    let nodes = vec![common::directive(DirectiveKind::Import(ImportDirective {
        reference: "./a.mld".to_string(),
        clause: ImportClause::SideEffect,
    }))];
    let err = h.interpreter.run(&nodes).await.expect_err("must cycle");
    let message = err.to_string();
    assert_eq!(err.code(), "CIRCULAR_IMPORT");
    assert!(message.contains("/project/a.mld"), "{message}");
    assert!(message.contains("/project/b.mld"), "{message}");
}

#[tokio::test]
async fn guard_denial_routes_to_when_denied_and_blocks_the_stage() {
    let h = harness();

    // The input variable carries a blocked-directory taint label.
    h.interpreter.env().with_taint(|tracker| {
        tracker.record(
            "payload",
            SecurityDescriptor::labeled("dir:/dir-parent-blocked", TaintLevel::Tainted),
        );
    });

    let nodes = vec![
        common::directive(DirectiveKind::Guard(GuardDirective {
            name: "no_blocked_dir".to_string(),
            timing: GuardTiming::Before,
            target: Some("runBlocked".to_string()),
            condition: GuardCondition::HasLabel {
                label: "dir:/dir-parent-blocked".to_string(),
            },
            decision: GuardDecisionSpec::Deny {
                reason: "input comes from a blocked directory".to_string(),
            },
        })),
        exe(
            "runBlocked",
            &["x"],
            ExeBody::Command {
                nodes: vec![text("cat "), var_ref("x")],
            },
        ),
        var_assign("payload", string_lit("secrets")),
        show(pipeline(
            mlld_ast::ValueExpr::Reference {
                reference: mlld_ast::VariableReference::new("payload"),
            },
            &["runBlocked"],
        )),
        common::directive(DirectiveKind::When(WhenDirective {
            arms: vec![WhenArm {
                condition: WhenCondition::Denied,
                actions: vec![show(string_lit("guard blocked it"))],
            }],
            all: false,
        })),
    ];

    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "guard blocked it\n");
    // The wrapped command never ran.
    assert_eq!(h.commands.commands(), Vec::<String>::new());
}

#[tokio::test]
async fn shell_arrays_expand_to_separately_escaped_tokens() {
    let h = harness();
    let nodes = vec![
        var_assign("xs", array(vec![string_lit("a"), string_lit("b c")])),
        common::directive(DirectiveKind::Run(RunDirective {
            body: ExeBody::Command {
                nodes: vec![text("echo "), var_ref("xs")],
            },
            collect_errors: false,
            pipes: Vec::new(),
        })),
    ];
    h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(h.commands.commands(), vec!["echo a \"b c\"".to_string()]);
}

#[tokio::test]
async fn module_import_binds_executables_with_their_siblings() {
    let h = harness();
    h.fs.seed("/project/util.mld", "module-util");
    h.parser.insert(
        "module-util",
        vec![
            var_assign("greeting", string_lit("hi")),
            exe(
                "shout",
                &[],
                ExeBody::Template {
                    nodes: vec![var_ref("greeting"), text("!")],
                },
            ),
            common::directive(DirectiveKind::Export(mlld_ast::ExportDirective {
                names: vec!["shout".to_string()],
            })),
        ],
    );

    let nodes = vec![
        common::directive(DirectiveKind::Import(ImportDirective {
            reference: "./util.mld".to_string(),
            clause: ImportClause::Named {
                bindings: vec![ImportBinding {
                    name: "shout".to_string(),
                    alias: None,
                }],
            },
        })),
        show(common::invoke("shout")),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    // The imported executable resolves @greeting through its module
    // environment even though the importing file never bound it.
    assert_eq!(document, "hi!\n");

    // The export manifest hides unlisted names.
    let err = h
        .interpreter
        .run(&[common::directive(DirectiveKind::Import(ImportDirective {
            reference: "./util.mld".to_string(),
            clause: ImportClause::Named {
                bindings: vec![ImportBinding {
                    name: "greeting".to_string(),
                    alias: None,
                }],
            },
        }))])
        .await
        .expect_err("not exported");
    assert!(matches!(
        err.root_kind(),
        MlldError::VariableResolution { .. }
    ));
}

#[tokio::test]
async fn import_collision_is_rejected() {
    let h = harness();
    h.fs.seed("/project/one.mld", "module-one");
    h.fs.seed("/project/two.mld", "module-two");
    h.parser
        .insert("module-one", vec![var_assign("x", string_lit("1"))]);
    h.parser
        .insert("module-two", vec![var_assign("x", string_lit("2"))]);

    let import = |reference: &str| {
        common::directive(DirectiveKind::Import(ImportDirective {
            reference: reference.to_string(),
            clause: ImportClause::Named {
                bindings: vec![ImportBinding {
                    name: "x".to_string(),
                    alias: None,
                }],
            },
        }))
    };
    let err = h
        .interpreter
        .run(&[import("./one.mld"), import("./two.mld")])
        .await
        .expect_err("collision");
    assert_eq!(err.code(), "IMPORT_COLLISION");
}

#[tokio::test]
async fn for_iterates_in_child_scopes() {
    let h = harness();
    let nodes = vec![
        var_assign("xs", array(vec![string_lit("one"), string_lit("two")])),
        common::directive(DirectiveKind::For(mlld_ast::ForDirective {
            binding: "x".to_string(),
            iterable: mlld_ast::ValueExpr::Reference {
                reference: mlld_ast::VariableReference::new("xs"),
            },
            body: vec![show(template(vec![var_ref("x")]))],
        })),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "one\ntwo\n");
    // The iteration binding does not leak into the surrounding scope.
    assert!(h.interpreter.env().get_variable("x").is_none());
}

#[tokio::test]
async fn collected_command_failures_defer_instead_of_aborting() {
    let h = harness();
    h.commands.fail_with(2, "boom");

    let run = |collect: bool| {
        common::directive(DirectiveKind::Run(RunDirective {
            body: ExeBody::Command {
                nodes: vec![text("false")],
            },
            collect_errors: collect,
            pipes: Vec::new(),
        }))
    };

    // Collected: the document continues and the failure is deferred.
    let nodes = vec![run(true), show(string_lit("still here"))];
    let document = h.interpreter.run(&nodes).await.expect("continues");
    assert_eq!(document, "still here\n");
    let collected = h
        .interpreter
        .env()
        .collected_errors()
        .expect("root alive");
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].exit_code, 2);
    assert_eq!(collected[0].stderr, "boom");

    // Not collected: the same failure aborts evaluation.
    let err = h.interpreter.run(&[run(false)]).await.expect_err("aborts");
    assert_eq!(err.code(), "COMMAND_EXECUTION");
}

#[tokio::test]
async fn markdown_nodes_pass_through_verbatim() {
    let h = harness();
    let nodes = vec![
        text("# Title"),
        Node::Newline(mlld_ast::Newline::default()),
        var_assign("unused", string_lit("x")),
        text("body"),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "# Title\nbody");
}

#[tokio::test]
async fn section_loads_bind_section_text() {
    let h = harness();
    h.fs.seed("/project/guide.md", "# Intro\nwelcome\n\n# Next\nrest\n");

    let load = mlld_ast::ValueExpr::Load {
        reference: mlld_ast::FileReference {
            path: Some("guide.md".to_string()),
            section: Some("Intro".to_string()),
            fields: Vec::new(),
            pipes: Vec::new(),
            node_id: mlld_ast::NodeId::default(),
            span: mlld_ast::Span::default(),
        },
    };
    let nodes = vec![
        var_assign("intro", load),
        show(template(vec![var_ref("intro")])),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "welcome\n");

    let bound = h
        .interpreter
        .env()
        .get_variable("intro")
        .expect("present");
    assert!(matches!(
        bound.kind,
        mlld_variables::VariableKind::SectionText { .. }
    ));
}

#[tokio::test]
async fn frontmatter_binds_fm() {
    let h = harness();
    let nodes = vec![
        Node::Frontmatter(mlld_ast::Frontmatter {
            content: "title: Test Doc\n".to_string(),
            node_id: mlld_ast::NodeId::default(),
            span: mlld_ast::Span::default(),
        }),
        show(template(vec![field_ref("fm", &["title"])])),
    ];
    let document = h.interpreter.run(&nodes).await.expect("evaluates");
    assert_eq!(document, "Test Doc\n");
}
