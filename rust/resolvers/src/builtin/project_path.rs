//! `@base/...` — files under the project root.

use std::sync::Arc;

use async_trait::async_trait;
use mlld_security::{PathValidator, RawPath, ValidationContext};

use crate::content::{ContentType, ResolverContent};
use crate::error::ResolverError;
use crate::fs::FileSystem;
use crate::manager::{ResolutionContext, ResolveOptions, Resolver, ResolverType};

/// Resolves `@base/relative/path` against the project root.
#[derive(Debug)]
pub struct ProjectPathResolver {
    fs: Arc<dyn FileSystem>,
}

impl ProjectPathResolver {
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Resolver for ProjectPathResolver {
    fn name(&self) -> &'static str {
        "project-path"
    }

    fn resolver_type(&self) -> ResolverType {
        ResolverType::Path
    }

    fn priority(&self) -> u32 {
        1
    }

    fn contexts(&self) -> &'static [ResolutionContext] {
        &[
            ResolutionContext::Import,
            ResolutionContext::Path,
            ResolutionContext::Output,
            ResolutionContext::Variable,
        ]
    }

    fn can_resolve(&self, reference: &str) -> bool {
        reference.starts_with("@base/")
    }

    async fn resolve(
        &self,
        reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        let relative = reference.trim_start_matches("@base/");
        let validated = PathValidator.validate(
            &RawPath::new(relative),
            &ValidationContext::rooted(&opts.project_root),
        )?;
        if !self.fs.is_file(&validated.validated_path).await {
            return Err(ResolverError::NotFound {
                path: validated.validated_path.as_path().display().to_string(),
            });
        }
        let content = self.fs.read_file(&validated.validated_path).await?;
        let source = validated.validated_path.as_path().display().to_string();
        let content_type = if source.ends_with(".mld") {
            ContentType::Module
        } else {
            ContentType::Text
        };
        Ok(match content_type {
            ContentType::Module => ResolverContent::module(content, source),
            _ => ResolverContent::text(content, source),
        })
    }
}
