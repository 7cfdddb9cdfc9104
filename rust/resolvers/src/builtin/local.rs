//! Local files and local modules.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mlld_security::{PathValidator, RawPath, ValidationContext};

use crate::content::{ContentType, ResolverContent};
use crate::error::ResolverError;
use crate::fs::FileSystem;
use crate::manager::{ResolutionContext, ResolveOptions, Resolver, ResolverType};

/// Whether a reference is a module coordinate (`@scope/name`).
#[must_use]
pub(crate) fn is_module_ref(reference: &str) -> bool {
    reference
        .strip_prefix('@')
        .is_some_and(|rest| rest.contains('/') && !rest.starts_with('/'))
}

/// Resolves relative file paths and `@scope/name` coordinates against the
/// configured local-modules directory.
#[derive(Debug)]
pub struct LocalResolver {
    fs: Arc<dyn FileSystem>,
    local_modules: PathBuf,
}

impl LocalResolver {
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, local_modules: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            local_modules: local_modules.into(),
        }
    }

    fn candidate_path(&self, reference: &str, opts: &ResolveOptions) -> (RawPath, PathBuf) {
        if let Some(coordinate) = reference.strip_prefix('@') {
            let raw = RawPath::new(
                self.local_modules
                    .join(format!("{coordinate}.mld"))
                    .display()
                    .to_string(),
            );
            (raw, opts.project_root.clone())
        } else {
            (RawPath::new(reference), opts.base_dir.clone())
        }
    }
}

#[async_trait]
impl Resolver for LocalResolver {
    fn name(&self) -> &'static str {
        "local"
    }

    fn resolver_type(&self) -> ResolverType {
        ResolverType::File
    }

    fn priority(&self) -> u32 {
        20
    }

    fn contexts(&self) -> &'static [ResolutionContext] {
        &[
            ResolutionContext::Import,
            ResolutionContext::Path,
            ResolutionContext::Variable,
        ]
    }

    fn can_resolve(&self, reference: &str) -> bool {
        is_module_ref(reference)
            || reference.starts_with("./")
            || reference.starts_with("../")
            || (!reference.starts_with('@') && !reference.contains("://"))
    }

    async fn resolve(
        &self,
        reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        let (raw, working_dir) = self.candidate_path(reference, opts);
        // Module candidates are absolute by construction (modules dir
        // under the project root); external escapes are still rejected.
        let ctx = ValidationContext {
            allow_absolute: true,
            ..ValidationContext::rooted(&working_dir)
        };
        // A reference this resolver cannot satisfy falls through to the
        // rest of the chain rather than aborting it.
        let validated =
            PathValidator
                .validate(&raw, &ctx)
                .map_err(|err| ResolverError::ResolveFailed {
                    resolver: "local".to_string(),
                    reference: reference.to_string(),
                    message: err.to_string(),
                })?;
        if !self.fs.is_file(&validated.validated_path).await {
            return Err(ResolverError::NotFound {
                path: validated.validated_path.as_path().display().to_string(),
            });
        }
        let content = self.fs.read_file(&validated.validated_path).await?;
        let source = validated.validated_path.as_path().display().to_string();
        let content_type = match source.rsplit('.').next() {
            Some("mld") => ContentType::Module,
            Some("json") => ContentType::Data,
            _ => ContentType::Text,
        };
        Ok(match content_type {
            ContentType::Module => ResolverContent::module(content, source),
            ContentType::Data => ResolverContent::data(content, source),
            ContentType::Text => ResolverContent::text(content, source),
        })
    }
}
