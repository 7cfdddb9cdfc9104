//! Command and code executors.
//!
//! Shell spawning mechanics live behind [`CommandExecutor`]; embedded
//! js/node execution behind [`CodeExecutor`]. The defaults spawn `sh -c`
//! and `node -e` through `tokio::process` with a timeout. The environment
//! injects the immutable `ctx` object for js/node bodies.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use mlld_ast::CodeLanguage;

use crate::error::{MlldError, MlldResult};
use crate::shadow::ShadowFunction;

/// Default command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for one command execution.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub cwd: PathBuf,
    /// Environment variables the child may see.
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl ExecOptions {
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// The result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

/// Runs shell commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync + std::fmt::Debug {
    /// Execute `command` and return its captured output.
    ///
    /// A non-zero exit is returned as an `Ok` result; callers decide
    /// whether to raise, collect, or ignore it. Spawn failures and
    /// timeouts are errors.
    async fn execute(&self, command: &str, opts: &ExecOptions) -> MlldResult<ExecResult>;
}

/// The default `sh -c` executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommandExecutor;

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn execute(&self, command: &str, opts: &ExecOptions) -> MlldResult<ExecResult> {
        let started = Instant::now();
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&opts.cwd)
            .env_clear()
            .envs(&opts.env)
            .output();

        let output = tokio::time::timeout(opts.timeout, child)
            .await
            .map_err(|_| MlldError::CommandExecution {
                command: command.to_string(),
                stderr: format!("timed out after {:?}", opts.timeout),
                exit_code: -1,
                duration_ms: u64::try_from(opts.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|err| MlldError::CommandExecution {
                command: command.to_string(),
                stderr: err.to_string(),
                exit_code: -1,
                duration_ms: 0,
            })?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: started.elapsed(),
        })
    }
}

/// The ambient `ctx` view and parameter bindings handed to embedded code.
#[derive(Debug, Clone, Default)]
pub struct CodeParams {
    /// Positional parameter bindings, in declaration order.
    pub bindings: IndexMap<String, serde_json::Value>,
    /// The immutable `ctx` object (`try`, `tries`, `input`, `hint`).
    pub ctx: serde_json::Value,
    /// Shadow functions visible to the body.
    pub shadow: Vec<ShadowFunction>,
}

/// Runs embedded js/node code.
#[async_trait]
pub trait CodeExecutor: Send + Sync + std::fmt::Debug {
    async fn execute(
        &self,
        lang: CodeLanguage,
        source: &str,
        params: &CodeParams,
    ) -> MlldResult<serde_json::Value>;
}

/// The default executor: shells out to a `node` binary.
///
/// Construction never probes for the binary; a missing or broken `node`
/// surfaces as a [`MlldError::ShadowEnvironment`] on first use.
#[derive(Debug, Clone)]
pub struct NodeCodeExecutor {
    node_binary: String,
    timeout: Duration,
}

impl Default for NodeCodeExecutor {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl NodeCodeExecutor {
    #[must_use]
    pub fn new(node_binary: impl Into<String>) -> Self {
        Self {
            node_binary: node_binary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Wrap an mlld code body into a self-contained node program that
    /// prints the body's return value as JSON.
    #[must_use]
    pub fn build_program(source: &str, params: &CodeParams) -> String {
        let mut program = String::new();
        program.push_str(&format!(
            "const ctx = Object.freeze({});\n",
            if params.ctx.is_null() {
                "{}".to_string()
            } else {
                params.ctx.to_string()
            }
        ));
        for function in &params.shadow {
            program.push_str(&format!(
                "function {}({}) {{ {} }}\n",
                function.name,
                function.params.join(", "),
                function.source
            ));
        }
        let names: Vec<&str> = params.bindings.keys().map(String::as_str).collect();
        let args: Vec<String> = params.bindings.values().map(ToString::to_string).collect();
        program.push_str(&format!(
            "const __result = (function({}) {{ {} }})({});\n",
            names.join(", "),
            source,
            args.join(", ")
        ));
        program.push_str(
            "process.stdout.write(JSON.stringify(__result === undefined ? null : __result));\n",
        );
        program
    }
}

#[async_trait]
impl CodeExecutor for NodeCodeExecutor {
    async fn execute(
        &self,
        lang: CodeLanguage,
        source: &str,
        params: &CodeParams,
    ) -> MlldResult<serde_json::Value> {
        if lang == CodeLanguage::Sh {
            return Err(MlldError::internal(
                "shell bodies go through the command executor",
            ));
        }

        let program = Self::build_program(source, params);
        let child = tokio::process::Command::new(&self.node_binary)
            .arg("-e")
            .arg(&program)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| MlldError::ShadowEnvironment {
                lang: lang.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|err| MlldError::ShadowEnvironment {
                lang: lang.to_string(),
                message: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(MlldError::ShadowEnvironment {
                lang: lang.to_string(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&stdout).map_err(|err| MlldError::ShadowEnvironment {
            lang: lang.to_string(),
            message: format!("result is not JSON: {err}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn program_injects_ctx_bindings_and_shadow() {
        let mut params = CodeParams::default();
        params.ctx = serde_json::json!({ "try": 2, "tries": ["v1"], "input": "v1", "hint": null });
        params
            .bindings
            .insert("x".to_string(), serde_json::json!("value"));
        params.shadow.push(ShadowFunction {
            name: "double".into(),
            params: vec!["n".into()],
            source: "return n * 2;".into(),
        });

        let program = NodeCodeExecutor::build_program("return x;", &params);
        assert!(program.contains("const ctx = Object.freeze({\"try\":2"));
        assert!(program.contains("function double(n) { return n * 2; }"));
        assert!(program.contains("(function(x) { return x; })(\"value\")"));
    }

    #[test]
    fn empty_params_still_produce_a_program() {
        let program = NodeCodeExecutor::build_program("return 1;", &CodeParams::default());
        assert_eq!(
            program.lines().next(),
            Some("const ctx = Object.freeze({});")
        );
    }
}
