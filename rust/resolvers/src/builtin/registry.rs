//! The module registry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::builtin::local::is_module_ref;
use crate::content::ResolverContent;
use crate::error::ResolverError;
use crate::fetch::UrlFetcher;
use crate::manager::{ResolutionContext, ResolveOptions, Resolver, ResolverType};

pub(crate) const DEFAULT_REGISTRY_BASE: &str = "https://registry.mlld.org/modules";

/// Resolves `@scope/name` coordinates against the module registry.
///
/// The HTTPS transport itself is external; this resolver only shapes the
/// URL and classifies the response. Network failures fall through so a
/// local module with the same coordinate can still win.
#[derive(Debug)]
pub struct RegistryResolver {
    fetcher: Arc<dyn UrlFetcher>,
    base_url: String,
}

impl RegistryResolver {
    #[must_use]
    pub fn new(fetcher: Arc<dyn UrlFetcher>) -> Self {
        Self::with_base_url(fetcher, DEFAULT_REGISTRY_BASE)
    }

    #[must_use]
    pub fn with_base_url(fetcher: Arc<dyn UrlFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    fn module_url(&self, reference: &str) -> String {
        let coordinate = reference.trim_start_matches('@');
        format!("{}/{coordinate}.mld", self.base_url)
    }
}

#[async_trait]
impl Resolver for RegistryResolver {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn resolver_type(&self) -> ResolverType {
        ResolverType::Module
    }

    fn priority(&self) -> u32 {
        10
    }

    fn contexts(&self) -> &'static [ResolutionContext] {
        &[ResolutionContext::Import, ResolutionContext::Variable]
    }

    fn can_resolve(&self, reference: &str) -> bool {
        is_module_ref(reference) && !reference.starts_with("@base/")
    }

    async fn resolve(
        &self,
        reference: &str,
        _opts: &ResolveOptions,
    ) -> Result<ResolverContent, ResolverError> {
        let url = self.module_url(reference);
        let response =
            self.fetcher
                .fetch(&url)
                .await
                .map_err(|err| ResolverError::ResolveFailed {
                    resolver: "registry".to_string(),
                    reference: reference.to_string(),
                    message: err.to_string(),
                })?;
        Ok(ResolverContent::module(response.body, url))
    }
}
