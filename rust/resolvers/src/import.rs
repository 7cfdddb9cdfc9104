//! Import semantics on top of the resolver chain.
//!
//! Importing adds side effects plain resolution does not have: a
//! circular-import stack, the content approval gate, fuzzy matching for
//! near-miss local paths, and header capture for URL imports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mlld_cache::{ContentCache, ContentHash, UrlCache};
use mlld_security::{
    ApprovalGate, ImportApprovalDecision, PathValidator, RawPath, ValidationContext,
};

use crate::content::{ContentType, ResolverContent};
use crate::error::ResolverError;
use crate::fetch::UrlFetcher;
use crate::fs::FileSystem;
use crate::manager::{ResolveOptions, ResolverManager};

/// Similarity floor for fuzzy local matching.
const FUZZY_THRESHOLD: f64 = 0.8;

/// TTL for URL import content.
const URL_TTL: Duration = Duration::from_secs(5 * 60);

/// Status and headers captured for a URL import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlImportResult {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
}

/// Content produced by an import, with its hash and URL view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedContent {
    pub content: ResolverContent,
    pub hash: Option<ContentHash>,
    pub url: Option<UrlImportResult>,
    /// The normalized path or URL the import stack was keyed by.
    pub resolved: String,
}

/// Wraps the [`ResolverManager`] with import-only semantics.
///
/// The import stack is shared between an environment's resolver and the
/// resolvers of its children (depth-first imports must see the whole
/// chain), but *not* across sibling environments.
#[derive(Debug)]
pub struct ImportResolver {
    manager: Arc<ResolverManager>,
    content_cache: Arc<ContentCache>,
    url_cache: Arc<UrlCache>,
    fetcher: Arc<dyn UrlFetcher>,
    fs: Arc<dyn FileSystem>,
    gate: Arc<dyn ApprovalGate>,
    import_stack: Arc<Mutex<Vec<String>>>,
    project_root: PathBuf,
    fuzzy: AtomicBool,
    approve_all: AtomicBool,
    allow_absolute: AtomicBool,
}

impl ImportResolver {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Arc<ResolverManager>,
        content_cache: Arc<ContentCache>,
        url_cache: Arc<UrlCache>,
        fetcher: Arc<dyn UrlFetcher>,
        fs: Arc<dyn FileSystem>,
        gate: Arc<dyn ApprovalGate>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            manager,
            content_cache,
            url_cache,
            fetcher,
            fs,
            gate,
            import_stack: Arc::new(Mutex::new(Vec::new())),
            project_root: project_root.into(),
            fuzzy: AtomicBool::new(true),
            approve_all: AtomicBool::new(false),
            allow_absolute: AtomicBool::new(false),
        }
    }

    /// A child resolver sharing this resolver's import stack and caches.
    #[must_use]
    pub fn create_child(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            content_cache: self.content_cache.clone(),
            url_cache: self.url_cache.clone(),
            fetcher: self.fetcher.clone(),
            fs: self.fs.clone(),
            gate: self.gate.clone(),
            import_stack: self.import_stack.clone(),
            project_root: self.project_root.clone(),
            fuzzy: AtomicBool::new(self.fuzzy.load(Ordering::SeqCst)),
            approve_all: AtomicBool::new(self.approve_all.load(Ordering::SeqCst)),
            allow_absolute: AtomicBool::new(self.allow_absolute.load(Ordering::SeqCst)),
        }
    }

    pub fn set_fuzzy(&self, fuzzy: bool) {
        self.fuzzy.store(fuzzy, Ordering::SeqCst);
    }

    pub fn set_approve_all(&self, approve_all: bool) {
        self.approve_all.store(approve_all, Ordering::SeqCst);
    }

    pub fn set_allow_absolute(&self, allow_absolute: bool) {
        self.allow_absolute.store(allow_absolute, Ordering::SeqCst);
    }

    #[must_use]
    pub fn allow_absolute(&self) -> bool {
        self.allow_absolute.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<ResolverManager> {
        &self.manager
    }

    /// Push `path` onto the import stack.
    ///
    /// # Errors
    ///
    /// [`ResolverError::CircularImport`] when `path` is already present;
    /// the message names the whole chain.
    pub fn begin_import(&self, path: &str) -> Result<(), ResolverError> {
        let mut stack = self
            .import_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if stack.iter().any(|entry| entry == path) {
            let chain = stack
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(path))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ResolverError::CircularImport { chain });
        }
        stack.push(path.to_string());
        Ok(())
    }

    /// Pop `path` from the import stack.
    pub fn end_import(&self, path: &str) {
        let mut stack = self
            .import_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = stack.iter().rposition(|entry| entry == path) {
            stack.remove(position);
        }
    }

    #[must_use]
    pub fn is_importing(&self, path: &str) -> bool {
        self.import_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry == path)
    }

    #[must_use]
    pub fn import_depth(&self) -> usize {
        self.import_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolve a reference for import.
    ///
    /// # Errors
    ///
    /// Resolution, validation, and approval errors; see [`ResolverError`].
    pub async fn resolve_import(
        &self,
        reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ImportedContent, ResolverError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.resolve_url(reference).await;
        }
        if reference.starts_with('@') {
            let content = self.manager.resolve(reference, opts).await?;
            return self.gated(reference, content, None);
        }
        self.resolve_local(reference, opts).await
    }

    async fn resolve_url(&self, url: &str) -> Result<ImportedContent, ResolverError> {
        // Cache hits skip the network but still pass the gate unless the
        // hash was already approved.
        if let Some(body) = self.url_cache.get(url) {
            let content = classify(body, url);
            return self.gated(url, content, None);
        }

        let response = self.fetcher.fetch(url).await?;
        self.url_cache.insert(url, response.body.clone(), URL_TTL);
        let content = classify(response.body, url);
        self.gated(
            url,
            content,
            Some(UrlImportResult {
                status: response.status,
                headers: response.headers,
            }),
        )
    }

    async fn resolve_local(
        &self,
        reference: &str,
        opts: &ResolveOptions,
    ) -> Result<ImportedContent, ResolverError> {
        let is_absolute = Path::new(reference).is_absolute();
        let ctx = ValidationContext {
            working_dir: if is_absolute {
                self.project_root.clone()
            } else {
                opts.base_dir.clone()
            },
            allow_external: self.allow_absolute.load(Ordering::SeqCst),
            allow_absolute: self.allow_absolute.load(Ordering::SeqCst)
                || Path::new(reference).starts_with(&self.project_root),
            allow_relative: true,
            allow_parent_traversal: true,
            allow_urls: false,
        };
        let validated = PathValidator.validate(&RawPath::new(reference), &ctx)?;

        let path = if self.fs.is_file(&validated.validated_path).await {
            validated.validated_path
        } else if self.fuzzy.load(Ordering::SeqCst) {
            let corrected = self
                .fuzzy_match(validated.validated_path.as_path(), &ctx)
                .await?;
            tracing::debug!(%reference, corrected = %corrected.as_path().display(), "fuzzy-matched import");
            corrected
        } else {
            return Err(ResolverError::NotFound {
                path: validated.validated_path.as_path().display().to_string(),
            });
        };

        let body = self.fs.read_file(&path).await?;
        let source = path.as_path().display().to_string();
        let content = classify(body, &source);
        let hash = self.content_cache.store(&content.content);
        Ok(ImportedContent {
            content,
            hash: Some(hash),
            url: None,
            resolved: source,
        })
    }

    /// Find the closest sibling of a missing file, requiring a single
    /// unambiguous winner above the similarity floor.
    async fn fuzzy_match(
        &self,
        missing: &Path,
        ctx: &ValidationContext,
    ) -> Result<mlld_security::ValidatedResourcePath, ResolverError> {
        let display = missing.display().to_string();
        let (Some(dir), Some(file_name)) = (
            missing.parent(),
            missing.file_name().map(|n| n.to_string_lossy().into_owned()),
        ) else {
            return Err(ResolverError::NotFound { path: display });
        };

        // `missing` already passed validation, so its directory and any
        // corrected sibling are absolute by construction.
        let ctx = &ValidationContext {
            allow_absolute: true,
            ..ctx.clone()
        };
        let dir_validated = PathValidator.validate(&RawPath::new(dir.display().to_string()), ctx)?;
        let siblings = self
            .fs
            .read_dir(&dir_validated.validated_path)
            .await
            .map_err(|_| ResolverError::NotFound { path: display.clone() })?;

        let mut best_score = 0.0_f64;
        let mut best: Vec<String> = Vec::new();
        for sibling in siblings {
            let score = strsim::normalized_levenshtein(&file_name, &sibling);
            if score < FUZZY_THRESHOLD {
                continue;
            }
            if score > best_score {
                best_score = score;
                best = vec![sibling];
            } else if (score - best_score).abs() < f64::EPSILON {
                best.push(sibling);
            }
        }

        match best.len() {
            0 => Err(ResolverError::NotFound { path: display }),
            1 => {
                let corrected = dir.join(&best[0]);
                let validated =
                    PathValidator.validate(&RawPath::new(corrected.display().to_string()), ctx)?;
                Ok(validated.validated_path)
            }
            _ => Err(ResolverError::AmbiguousMatch {
                path: display,
                candidates: best,
            }),
        }
    }

    fn gated(
        &self,
        reference: &str,
        content: ResolverContent,
        url: Option<UrlImportResult>,
    ) -> Result<ImportedContent, ResolverError> {
        let hash = self.content_cache.store(&content.content);

        let already_approved = self.content_cache.is_approved(&hash);
        if !self.approve_all.load(Ordering::SeqCst) && !already_approved {
            match self.gate.check(reference, hash.as_str()) {
                ImportApprovalDecision::Approved => {}
                ImportApprovalDecision::Denied { reason } => {
                    return Err(ResolverError::ImportApproval {
                        reference: reference.to_string(),
                        reason,
                    });
                }
            }
        }
        self.content_cache.mark_approved(&hash);

        let resolved = content.metadata.source.clone();
        Ok(ImportedContent {
            content,
            hash: Some(hash),
            url,
            resolved,
        })
    }
}

fn classify(body: String, source: &str) -> ResolverContent {
    let content_type = match source.rsplit('.').next() {
        Some("mld") => ContentType::Module,
        Some("json") => ContentType::Data,
        _ => ContentType::Text,
    };
    match content_type {
        ContentType::Module => ResolverContent::module(body, source),
        ContentType::Data => ResolverContent::data(body, source),
        ContentType::Text => ResolverContent::text(body, source),
    }
}

#[cfg(test)]
mod tests {
    use mlld_security::ApproveAll;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::fetch::StaticFetcher;
    use crate::fs::MemoryFileSystem;

    fn resolver_with(fs: MemoryFileSystem) -> ImportResolver {
        ImportResolver::new(
            Arc::new(ResolverManager::new()),
            Arc::new(ContentCache::new()),
            Arc::new(UrlCache::new()),
            Arc::new(StaticFetcher::new()),
            Arc::new(fs),
            Arc::new(ApproveAll),
            "/project",
        )
    }

    fn opts() -> ResolveOptions {
        ResolveOptions::import("/project", "/project")
    }

    #[test]
    fn circular_import_names_chain() {
        let resolver = resolver_with(MemoryFileSystem::new());
        resolver.begin_import("/project/a.mld").expect("first push");
        resolver.begin_import("/project/b.mld").expect("second push");

        let err = resolver
            .begin_import("/project/a.mld")
            .expect_err("circular");
        let message = err.to_string();
        assert!(message.contains("/project/a.mld"));
        assert!(message.contains("/project/b.mld"));

        resolver.end_import("/project/b.mld");
        resolver.end_import("/project/a.mld");
        assert_eq!(resolver.import_depth(), 0);
    }

    #[test]
    fn child_shares_stack() {
        let resolver = resolver_with(MemoryFileSystem::new());
        resolver.begin_import("/project/a.mld").expect("push");
        let child = resolver.create_child();
        assert!(child.is_importing("/project/a.mld"));
        assert!(child.begin_import("/project/a.mld").is_err());
    }

    #[tokio::test]
    async fn fuzzy_match_corrects_single_near_miss() {
        let fs = MemoryFileSystem::new();
        fs.seed("/project/utilities.mld", "/var @x = 1");
        let resolver = resolver_with(fs);

        let imported = resolver
            .resolve_import("./utilites.mld", &opts())
            .await
            .expect("fuzzy match");
        assert_eq!(imported.resolved, "/project/utilities.mld");
        assert_eq!(imported.content.content_type, ContentType::Module);
    }

    #[tokio::test]
    async fn ambiguous_fuzzy_match_is_an_error() {
        let fs = MemoryFileSystem::new();
        fs.seed("/project/utils1.mld", "");
        fs.seed("/project/utils2.mld", "");
        let resolver = resolver_with(fs);

        let err = resolver
            .resolve_import("./utils3.mld", &opts())
            .await
            .expect_err("ambiguous");
        assert!(matches!(err, ResolverError::AmbiguousMatch { .. }));
    }

    #[tokio::test]
    async fn absolute_outside_root_needs_permission() {
        let fs = MemoryFileSystem::new();
        fs.seed("/elsewhere/mod.mld", "");
        let resolver = resolver_with(fs);

        let err = resolver
            .resolve_import("/elsewhere/mod.mld", &opts())
            .await
            .expect_err("denied");
        assert!(matches!(err, ResolverError::PathValidation(_)));

        resolver.set_allow_absolute(true);
        resolver
            .resolve_import("/elsewhere/mod.mld", &opts())
            .await
            .expect("allowed");
    }

    #[tokio::test]
    async fn denied_gate_blocks_until_hash_approved() {
        let fs = MemoryFileSystem::new();
        let mut base = resolver_with(fs);
        let mut fetcher = StaticFetcher::new();
        fetcher.insert("https://example.com/mod.mld", "/var @x = 1");
        base.fetcher = Arc::new(fetcher);
        base.gate = Arc::new(mlld_security::HashAllowlistGate::new([]));
        let resolver = base;

        let err = resolver
            .resolve_import("https://example.com/mod.mld", &opts())
            .await
            .expect_err("denied");
        assert!(matches!(err, ResolverError::ImportApproval { .. }));

        // Approve the hash; the cached content now passes without a gate.
        let hash = ContentHash::of("/var @x = 1");
        resolver.content_cache.mark_approved(&hash);
        let imported = resolver
            .resolve_import("https://example.com/mod.mld", &opts())
            .await
            .expect("approved");
        assert_eq!(imported.hash, Some(hash));
    }
}
