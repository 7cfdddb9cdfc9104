//! Function resolvers for the reserved names `now`, `debug`, `input`,
//! and `base`. These compute values instead of reading files; their
//! metadata carries no hash.

use async_trait::async_trait;

use crate::content::{ContentMetadata, ContentType, ResolverContent};
use crate::error::ResolverError;
use crate::manager::{ResolutionContext, ResolveOptions, Resolver, ResolverType};

const FUNCTION_CONTEXTS: &[ResolutionContext] = &[ResolutionContext::Variable];

fn function_content(content: impl Into<String>, name: &str, ty: ContentType) -> ResolverContent {
    ResolverContent {
        content: content.into(),
        content_type: ty,
        metadata: ContentMetadata::now(format!("function:{name}")),
    }
}

/// `@now` — the current UTC timestamp, RFC 3339.
#[derive(Debug, Clone, Copy, Default)]
pub struct NowResolver;

#[async_trait]
impl Resolver for NowResolver {
    fn name(&self) -> &'static str {
        "now"
    }
    fn resolver_type(&self) -> ResolverType {
        ResolverType::Function
    }
    fn priority(&self) -> u32 {
        1
    }
    fn contexts(&self) -> &'static [ResolutionContext] {
        FUNCTION_CONTEXTS
    }
    fn can_resolve(&self, reference: &str) -> bool {
        reference == "now"
    }
    async fn resolve(
        &self,
        _reference: &str,
        _opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        Ok(function_content(
            chrono::Utc::now().to_rfc3339(),
            "now",
            ContentType::Text,
        ))
    }
}

/// `@debug` — a JSON snapshot of runtime facts, computed lazily.
#[derive(Debug, Clone, Default)]
pub struct DebugResolver;

#[async_trait]
impl Resolver for DebugResolver {
    fn name(&self) -> &'static str {
        "debug"
    }
    fn resolver_type(&self) -> ResolverType {
        ResolverType::Function
    }
    fn priority(&self) -> u32 {
        1
    }
    fn contexts(&self) -> &'static [ResolutionContext] {
        FUNCTION_CONTEXTS
    }
    fn can_resolve(&self, reference: &str) -> bool {
        reference == "debug"
    }
    async fn resolve(
        &self,
        _reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        let snapshot = serde_json::json!({
            "projectRoot": opts.project_root.display().to_string(),
            "baseDir": opts.base_dir.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        Ok(function_content(
            snapshot.to_string(),
            "debug",
            ContentType::Data,
        ))
    }
}

/// `@input` — the document's stdin content.
#[derive(Debug, Clone, Default)]
pub struct InputResolver {
    stdin: Option<String>,
}

impl InputResolver {
    #[must_use]
    pub fn new(stdin: Option<String>) -> Self {
        Self { stdin }
    }
}

#[async_trait]
impl Resolver for InputResolver {
    fn name(&self) -> &'static str {
        "input"
    }
    fn resolver_type(&self) -> ResolverType {
        ResolverType::Function
    }
    fn priority(&self) -> u32 {
        1
    }
    fn contexts(&self) -> &'static [ResolutionContext] {
        FUNCTION_CONTEXTS
    }
    fn can_resolve(&self, reference: &str) -> bool {
        reference == "input"
    }
    async fn resolve(
        &self,
        _reference: &str,
        _opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        Ok(function_content(
            self.stdin.clone().unwrap_or_default(),
            "input",
            ContentType::Text,
        ))
    }
}

/// `@base` — the project root as a path value.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseResolver;

#[async_trait]
impl Resolver for BaseResolver {
    fn name(&self) -> &'static str {
        "base"
    }
    fn resolver_type(&self) -> ResolverType {
        ResolverType::Function
    }
    fn priority(&self) -> u32 {
        1
    }
    fn contexts(&self) -> &'static [ResolutionContext] {
        &[ResolutionContext::Variable, ResolutionContext::Path]
    }
    fn can_resolve(&self, reference: &str) -> bool {
        reference == "base"
    }
    async fn resolve(
        &self,
        _reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        Ok(function_content(
            opts.project_root.display().to_string(),
            "base",
            ContentType::Text,
        ))
    }
}
