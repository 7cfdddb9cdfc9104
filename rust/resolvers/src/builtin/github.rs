//! GitHub-hosted content.

use std::sync::Arc;

use async_trait::async_trait;

use crate::content::ResolverContent;
use crate::error::ResolverError;
use crate::fetch::UrlFetcher;
use crate::manager::{ResolutionContext, ResolveOptions, Resolver, ResolverType};

/// Resolves `gh:owner/repo/path` coordinates and `github.com` blob URLs
/// by rewriting them to raw-content URLs.
#[derive(Debug)]
pub struct GithubResolver {
    fetcher: Arc<dyn UrlFetcher>,
}

impl GithubResolver {
    #[must_use]
    pub fn new(fetcher: Arc<dyn UrlFetcher>) -> Self {
        Self { fetcher }
    }

    fn raw_url(reference: &str) -> Option<String> {
        if let Some(coordinate) = reference.strip_prefix("gh:") {
            // owner/repo/path[@ref], default branch main
            let (path, git_ref) = match coordinate.split_once('@') {
                Some((path, git_ref)) => (path, git_ref),
                None => (coordinate, "main"),
            };
            let mut parts = path.splitn(3, '/');
            let owner = parts.next()?;
            let repo = parts.next()?;
            let file = parts.next()?;
            return Some(format!(
                "https://raw.githubusercontent.com/{owner}/{repo}/{git_ref}/{file}"
            ));
        }
        if reference.starts_with("https://github.com/") && reference.contains("/blob/") {
            return Some(
                reference
                    .replacen("https://github.com/", "https://raw.githubusercontent.com/", 1)
                    .replacen("/blob/", "/", 1),
            );
        }
        None
    }
}

#[async_trait]
impl Resolver for GithubResolver {
    fn name(&self) -> &'static str {
        "github"
    }

    fn resolver_type(&self) -> ResolverType {
        ResolverType::Io
    }

    fn priority(&self) -> u32 {
        20
    }

    fn contexts(&self) -> &'static [ResolutionContext] {
        &[ResolutionContext::Import, ResolutionContext::Variable]
    }

    fn can_resolve(&self, reference: &str) -> bool {
        Self::raw_url(reference).is_some()
    }

    async fn resolve(
        &self,
        reference: &str,
        _opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        let url = Self::raw_url(reference).ok_or_else(|| ResolverError::NoResolver {
            reference: reference.to_string(),
        })?;
        let response = self.fetcher.fetch(&url).await?;
        if url.ends_with(".mld") {
            Ok(ResolverContent::module(response.body, url))
        } else {
            Ok(ResolverContent::text(response.body, url))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn coordinate_rewrites_to_raw() {
        assert_eq!(
            GithubResolver::raw_url("gh:mlld-lang/modules/util.mld").as_deref(),
            Some("https://raw.githubusercontent.com/mlld-lang/modules/main/util.mld")
        );
        assert_eq!(
            GithubResolver::raw_url("gh:mlld-lang/modules/util.mld@v2").as_deref(),
            Some("https://raw.githubusercontent.com/mlld-lang/modules/v2/util.mld")
        );
    }

    #[test]
    fn blob_url_rewrites_to_raw() {
        assert_eq!(
            GithubResolver::raw_url("https://github.com/o/r/blob/main/a.mld").as_deref(),
            Some("https://raw.githubusercontent.com/o/r/main/a.mld")
        );
    }
}
