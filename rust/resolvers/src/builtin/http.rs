//! Plain URL references.

use std::sync::Arc;

use async_trait::async_trait;

use crate::content::ResolverContent;
use crate::error::ResolverError;
use crate::fetch::UrlFetcher;
use crate::manager::{ResolutionContext, ResolveOptions, Resolver, ResolverType};

/// Resolves `http://` and `https://` references.
#[derive(Debug)]
pub struct HttpResolver {
    fetcher: Arc<dyn UrlFetcher>,
}

impl HttpResolver {
    #[must_use]
    pub fn new(fetcher: Arc<dyn UrlFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    fn name(&self) -> &'static str {
        "http"
    }

    fn resolver_type(&self) -> ResolverType {
        ResolverType::Io
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
        reference.starts_with("http://") || reference.starts_with("https://")
    }

    async fn resolve(
        &self,
        reference: &str,
        _opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        let response = self.fetcher.fetch(reference).await?;
        if reference.ends_with(".mld") {
            Ok(ResolverContent::module(response.body, reference))
        } else if reference.ends_with(".json") {
            Ok(ResolverContent::data(response.body, reference))
        } else {
            Ok(ResolverContent::text(response.body, reference))
        }
    }
}
