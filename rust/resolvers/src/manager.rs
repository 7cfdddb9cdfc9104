//! The resolver chain.
//!
//! Resolution order for a reference R:
//! 1. If R is prefixed (`@X/...`), prefix configurations matching `@X/`
//!    are tried in registration order; a declining or failing
//!    prefix-bound resolver falls through.
//! 2. Every resolver whose `can_resolve(R)` returns true is tried in
//!    priority order (lower wins, registration order breaks ties).
//! 3. The first success wins; an error surfaces only when nothing
//!    accepts R.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::content::ResolverContent;
use crate::error::ResolverError;

/// The broad category of a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverType {
    Function,
    Module,
    File,
    Path,
    Io,
}

/// Where a resolution request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionContext {
    Import,
    Path,
    Output,
    Variable,
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub context: ResolutionContext,
    /// Directory of the requesting file; relative references resolve
    /// against it.
    pub base_dir: PathBuf,
    pub project_root: PathBuf,
}

impl ResolveOptions {
    #[must_use]
    pub fn import(base_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            context: ResolutionContext::Import,
            base_dir: base_dir.into(),
            project_root: project_root.into(),
        }
    }
}

/// One participant in the chain.
#[async_trait]
pub trait Resolver: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn resolver_type(&self) -> ResolverType;

    /// Lower is higher precedence.
    fn priority(&self) -> u32;

    fn contexts(&self) -> &'static [ResolutionContext];

    fn can_resolve(&self, reference: &str) -> bool;

    async fn resolve(
        &self,
        reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError>;
}

/// Binds `@X/` references to a named resolver, optionally exposing the
/// prefix's base directory and reserving the identifier.
#[derive(Debug, Clone)]
pub struct PrefixConfig {
    /// Includes the trailing slash: `"@base/"`.
    pub prefix: String,
    /// The bound resolver's `name()`.
    pub resolver: String,
    pub base_dir: Option<PathBuf>,
    pub reserves_identifier: bool,
}

impl PrefixConfig {
    /// The identifier the prefix reserves (`"@base/"` → `"base"`).
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.prefix
            .trim_start_matches('@')
            .trim_end_matches('/')
    }
}

/// The priority-ordered, prefix-aware resolver chain.
#[derive(Debug, Default)]
pub struct ResolverManager {
    resolvers: Vec<Arc<dyn Resolver>>,
    prefixes: Vec<PrefixConfig>,
    local_modules_path: Option<PathBuf>,
}

impl ResolverManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver. Re-registering the same `name()` replaces the
    /// earlier entry, keeping its position.
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        if let Some(slot) = self
            .resolvers
            .iter_mut()
            .find(|existing| existing.name() == resolver.name())
        {
            *slot = resolver;
        } else {
            self.resolvers.push(resolver);
        }
    }

    /// Register a prefix configuration. Duplicate prefixes are rejected.
    pub fn register_prefix(&mut self, config: PrefixConfig) -> bool {
        if self.prefixes.iter().any(|p| p.prefix == config.prefix) {
            return false;
        }
        self.prefixes.push(config);
        true
    }

    /// Identifiers reserved by prefix configurations; the environment
    /// marks these as unbindable.
    #[must_use]
    pub fn prefix_names(&self) -> Vec<String> {
        self.prefixes
            .iter()
            .filter(|p| p.reserves_identifier)
            .map(|p| p.identifier().to_string())
            .collect()
    }

    /// The base directory a prefix exposes as a read-only path variable.
    #[must_use]
    pub fn prefix_base_dir(&self, identifier: &str) -> Option<&PathBuf> {
        self.prefixes
            .iter()
            .find(|p| p.identifier() == identifier)
            .and_then(|p| p.base_dir.as_ref())
    }

    pub fn set_local_modules_path(&mut self, path: impl Into<PathBuf>) {
        self.local_modules_path = Some(path.into());
    }

    /// The configured local module path, defaulting to `llm/modules`.
    #[must_use]
    pub fn local_modules_path(&self) -> PathBuf {
        self.local_modules_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("llm/modules"))
    }

    #[must_use]
    pub fn resolver(&self, name: &str) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.iter().find(|r| r.name() == name)
    }

    /// Resolve a reference.
    ///
    /// # Errors
    ///
    /// [`ResolverError::NoResolver`] when nothing accepts the reference;
    /// otherwise the last non-fall-through error from an accepting
    /// resolver.
    pub async fn resolve(
        &self,
        reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        // Step 1: prefix-bound resolvers, in registration order.
        for prefix in self.prefixes.iter().filter(|p| reference.starts_with(&p.prefix)) {
            let Some(resolver) = self.resolver(&prefix.resolver) else {
                continue;
            };
            match resolver.resolve(reference, opts).await {
                Ok(content) => return Ok(content),
                Err(err) if err.is_fall_through() => {
                    tracing::debug!(
                        resolver = resolver.name(),
                        prefix = %prefix.prefix,
                        %reference,
                        "prefix resolver declined, falling through"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        // Step 2: priority-ordered scan of accepting resolvers.
        let mut candidates: Vec<&Arc<dyn Resolver>> = self
            .resolvers
            .iter()
            .filter(|r| r.contexts().contains(&opts.context) && r.can_resolve(reference))
            .collect();
        candidates.sort_by_key(|r| r.priority());

        if candidates.is_empty() {
            return Err(ResolverError::NoResolver {
                reference: reference.to_string(),
            });
        }

        let mut last_err = None;
        for resolver in candidates {
            match resolver.resolve(reference, opts).await {
                Ok(content) => return Ok(content),
                Err(err) if err.is_fall_through() => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| ResolverError::NoResolver {
            reference: reference.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug)]
    struct Canned {
        name: &'static str,
        priority: u32,
        accepts: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Resolver for Canned {
        fn name(&self) -> &'static str {
            self.name
        }
        fn resolver_type(&self) -> ResolverType {
            ResolverType::Module
        }
        fn priority(&self) -> u32 {
            self.priority
        }
        fn contexts(&self) -> &'static [ResolutionContext] {
            &[ResolutionContext::Import, ResolutionContext::Variable]
        }
        fn can_resolve(&self, reference: &str) -> bool {
            reference.starts_with(self.accepts)
        }
        async fn resolve(
            &self,
            reference: &str,
            _opts: &ResolveOptions,
        ) -> Result<ResolverContent, ResolverError> {
            if self.fail {
                return Err(ResolverError::NotFound {
                    path: reference.to_string(),
                });
            }
            Ok(ResolverContent::module(
                format!("from {}", self.name),
                reference,
            ))
        }
    }

    fn opts() -> ResolveOptions {
        ResolveOptions::import("/project", "/project")
    }

    #[tokio::test]
    async fn priority_order_wins() {
        let mut manager = ResolverManager::new();
        manager.register(Arc::new(Canned {
            name: "slow",
            priority: 20,
            accepts: "@",
            fail: false,
        }));
        manager.register(Arc::new(Canned {
            name: "fast",
            priority: 1,
            accepts: "@",
            fail: false,
        }));

        let content = manager.resolve("@scope/mod", &opts()).await.expect("resolved");
        assert_eq!(content.content, "from fast");
    }

    #[tokio::test]
    async fn prefix_match_tried_first_then_falls_through() {
        let mut manager = ResolverManager::new();
        manager.register(Arc::new(Canned {
            name: "general",
            priority: 5,
            accepts: "@x/",
            fail: false,
        }));
        manager.register(Arc::new(Canned {
            name: "bound",
            priority: 50,
            accepts: "@x/",
            fail: true,
        }));
        manager.register_prefix(PrefixConfig {
            prefix: "@x/".into(),
            resolver: "bound".into(),
            base_dir: None,
            reserves_identifier: true,
        });

        // The bound resolver declines; the general chain answers.
        let content = manager.resolve("@x/mod", &opts()).await.expect("resolved");
        assert_eq!(content.content, "from general");
        assert_eq!(manager.prefix_names(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn nothing_accepts() {
        let manager = ResolverManager::new();
        let err = manager.resolve("@missing/mod", &opts()).await.expect_err("fails");
        assert!(matches!(err, ResolverError::NoResolver { .. }));
    }

    #[test]
    fn duplicate_prefixes_rejected() {
        let mut manager = ResolverManager::new();
        let config = PrefixConfig {
            prefix: "@base/".into(),
            resolver: "project-path".into(),
            base_dir: None,
            reserves_identifier: true,
        };
        assert!(manager.register_prefix(config.clone()));
        assert!(!manager.register_prefix(config));
    }
}
