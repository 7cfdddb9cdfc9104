//! The mlld evaluation runtime.
//!
//! mlld is a small directive language embedded in Markdown: a document is
//! a sequence of Markdown nodes interleaved with directives (`/var`,
//! `/exe`, `/run`, `/show`, `/import`, ...) that define variables,
//! declare executables, invoke them, compose them through pipelines, and
//! emit output into the surrounding document. This crate is the runtime
//! that gives those directives meaning:
//!
//! - [`env::Environment`] — the scoped variable store and the hub that
//!   composes security, resolution, execution, and effects.
//! - [`eval`] — the recursive tree-walk evaluator.
//! - [`interpolate`] — template-to-string conversion with context-aware
//!   escaping.
//! - [`pipeline`] — multi-stage value transformation with guards,
//!   retries, and hint threading.
//!
//! Parsing, CLI handling, and transport live outside; their contracts
//! are the traits in [`parser`], [`exec`], and the `mlld-resolvers`
//! crate.

pub mod config;
pub mod context;
pub mod effects;
pub mod env;
pub mod error;
pub mod eval;
pub mod exec;
pub mod interpolate;
pub mod parser;
pub mod pipeline;
pub mod shadow;
pub mod transformers;

use std::sync::Arc;

/// Whether `MLLD_DEBUG` requests verbose tracing. The runtime only emits
/// through `tracing`; hosts read this when installing their subscriber.
#[must_use]
pub fn debug_enabled() -> bool {
    std::env::var("MLLD_DEBUG").is_ok_and(|value| !value.is_empty() && value != "0")
}

pub use config::{ProjectConfig, ResolverPrefixEntry};
pub use effects::{CollectingEffectHandler, Effect, EffectHandler, EffectKind};
pub use env::{Environment, EnvironmentOptions};
pub use error::{CollectedError, MlldError, MlldResult};

/// A convenience facade: a root environment wired to a collecting effect
/// handler, returning the rendered document after evaluation.
pub struct Interpreter {
    env: Arc<Environment>,
    effects: Arc<CollectingEffectHandler>,
}

impl Interpreter {
    /// Build an interpreter from options; the options' effect handler is
    /// replaced by the collecting handler this facade reads back.
    #[must_use]
    pub fn new(mut options: EnvironmentOptions) -> Self {
        let effects = Arc::new(CollectingEffectHandler::new());
        options.effects = effects.clone();
        let env = Environment::root(options);
        Self { env, effects }
    }

    #[must_use]
    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    #[must_use]
    pub fn effects(&self) -> &Arc<CollectingEffectHandler> {
        &self.effects
    }

    /// Evaluate parsed document nodes and return the rendered document.
    ///
    /// # Errors
    ///
    /// The first evaluation error, annotated with file and span.
    pub async fn run(&self, nodes: &[mlld_ast::Node]) -> MlldResult<String> {
        eval::evaluate_document(&self.env, nodes).await?;
        Ok(self.effects.document())
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}
