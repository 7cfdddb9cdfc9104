//! Shared test fixtures: a memory-backed interpreter harness, recording
//! and scripted executors, and node builders (tests have no grammar, so
//! they construct parsed nodes directly).

// Each test binary uses a different slice of these helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use mlld_ast::{
    CodeLanguage, Directive, DirectiveKind, ExeBody, ExeDirective, Node, PipeStage, Primitive,
    ShowDirective, Text, ValueExpr, VarDirective, VariableReference,
};
use mlld_interpreter::exec::{CodeExecutor, CodeParams, CommandExecutor, ExecOptions, ExecResult};
use mlld_interpreter::parser::StaticParser;
use mlld_interpreter::{EnvironmentOptions, Interpreter, MlldResult, ProjectConfig};
use mlld_resolvers::{MemoryFileSystem, StaticFetcher};

/// A command executor that records every command and replies with a
/// canned result (empty stdout, exit 0 unless a failure is scripted).
#[derive(Debug, Default)]
pub struct RecordingCommandExecutor {
    log: Mutex<Vec<String>>,
    failure: Mutex<Option<(i32, String)>>,
}

impl RecordingCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every subsequent command exit with the given code and stderr.
    pub fn fail_with(&self, exit_code: i32, stderr: &str) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((exit_code, stderr.to_string()));
    }
}

#[async_trait]
impl CommandExecutor for RecordingCommandExecutor {
    async fn execute(&self, command: &str, _opts: &ExecOptions) -> MlldResult<ExecResult> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let (exit_code, stderr) = failure.unwrap_or((0, String::new()));
        Ok(ExecResult {
            stdout: String::new(),
            stderr,
            exit_code,
            duration: Duration::from_millis(1),
        })
    }
}

type CodeFn =
    dyn Fn(CodeLanguage, &str, &CodeParams) -> MlldResult<serde_json::Value> + Send + Sync;

/// A code executor driven by a closure; tests script the embedded-code
/// behavior instead of spawning a `node` binary.
pub struct ClosureCodeExecutor {
    f: Box<CodeFn>,
}

impl ClosureCodeExecutor {
    pub fn new(
        f: impl Fn(CodeLanguage, &str, &CodeParams) -> MlldResult<serde_json::Value>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self { f: Box::new(f) }
    }
}

impl std::fmt::Debug for ClosureCodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureCodeExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl CodeExecutor for ClosureCodeExecutor {
    async fn execute(
        &self,
        lang: CodeLanguage,
        source: &str,
        params: &CodeParams,
    ) -> MlldResult<serde_json::Value> {
        (self.f)(lang, source, params)
    }
}

/// A memory-backed interpreter plus handles to its collaborators.
pub struct Harness {
    pub interpreter: Interpreter,
    pub commands: Arc<RecordingCommandExecutor>,
    pub fs: Arc<MemoryFileSystem>,
    pub parser: Arc<StaticParser>,
}

impl Harness {
    pub fn document(&self) -> String {
        self.interpreter.effects().document()
    }
}

/// Build a harness, letting the caller adjust options (e.g. swap the
/// code executor) before the root environment is created.
pub fn harness_with(configure: impl FnOnce(&mut EnvironmentOptions)) -> Harness {
    let fs = Arc::new(MemoryFileSystem::new());
    let parser = Arc::new(StaticParser::new());
    let commands = Arc::new(RecordingCommandExecutor::new());

    let mut options = EnvironmentOptions::new(ProjectConfig::new("/project"));
    options.fs = fs.clone();
    options.parser = parser.clone();
    options.command_executor = commands.clone();
    options.fetcher = Arc::new(StaticFetcher::new());
    configure(&mut options);

    Harness {
        interpreter: Interpreter::new(options),
        commands,
        fs,
        parser,
    }
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

// ---------------------------------------------------------------------------
// Node builders
// ---------------------------------------------------------------------------

pub fn text(content: &str) -> Node {
    Node::Text(Text {
        content: content.to_string(),
        node_id: mlld_ast::NodeId::default(),
        span: mlld_ast::Span::new(
            mlld_ast::Position::new(1, 1, 1),
            mlld_ast::Position::new(1, 1, 1),
        ),
    })
}

pub fn var_ref(name: &str) -> Node {
    Node::VariableReference(VariableReference::new(name))
}

pub fn field_ref(name: &str, fields: &[&str]) -> Node {
    let mut reference = VariableReference::new(name);
    reference.fields = fields
        .iter()
        .map(|f| mlld_ast::FieldAccess::Key((*f).to_string()))
        .collect();
    Node::VariableReference(reference)
}

pub fn directive(kind: DirectiveKind) -> Node {
    let mut directive = Directive::new(kind);
    directive.span = mlld_ast::Span::new(
        mlld_ast::Position::new(1, 1, 1),
        mlld_ast::Position::new(1, 2, 2),
    );
    Node::Directive(directive)
}

pub fn var_assign(name: &str, value: ValueExpr) -> Node {
    directive(DirectiveKind::Var(VarDirective {
        name: name.to_string(),
        value,
        op: mlld_ast::AssignOp::Assign,
    }))
}

pub fn show(value: ValueExpr) -> Node {
    directive(DirectiveKind::Show(ShowDirective { value }))
}

pub fn exe(name: &str, params: &[&str], body: ExeBody) -> Node {
    directive(DirectiveKind::Exe(ExeDirective {
        name: name.to_string(),
        params: params.iter().map(|p| (*p).to_string()).collect(),
        body,
        captures: Vec::new(),
    }))
}

pub fn js_body(source: &str) -> ExeBody {
    ExeBody::Code {
        lang: CodeLanguage::Js,
        source: source.to_string(),
    }
}

pub fn string_lit(value: &str) -> ValueExpr {
    ValueExpr::Primitive {
        value: Primitive::String(value.to_string()),
    }
}

pub fn number_lit(value: f64) -> ValueExpr {
    ValueExpr::Primitive {
        value: Primitive::Number(value),
    }
}

pub fn template(nodes: Vec<Node>) -> ValueExpr {
    ValueExpr::Template { nodes }
}

pub fn object(entries: Vec<(&str, ValueExpr)>) -> ValueExpr {
    ValueExpr::Object {
        entries: entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect::<IndexMap<_, _>>(),
    }
}

pub fn array(items: Vec<ValueExpr>) -> ValueExpr {
    ValueExpr::Array { items }
}

pub fn invoke(target: &str) -> ValueExpr {
    ValueExpr::Invocation {
        invocation: mlld_ast::ExecInvocation {
            target: target.to_string(),
            args: Vec::new(),
            pipes: Vec::new(),
            node_id: mlld_ast::NodeId::default(),
            span: mlld_ast::Span::new(
                mlld_ast::Position::new(1, 1, 1),
                mlld_ast::Position::new(1, 2, 2),
            ),
        },
    }
}

pub fn pipeline(source: ValueExpr, stage_targets: &[&str]) -> ValueExpr {
    ValueExpr::Pipeline {
        source: Box::new(source),
        stages: stage_targets
            .iter()
            .map(|target| PipeStage::Exec {
                target: (*target).to_string(),
                args: Vec::new(),
            })
            .collect(),
    }
}
