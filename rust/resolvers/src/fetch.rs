//! URL fetching contract.
//!
//! The registry/HTTPS transport is an external collaborator; the chain
//! only needs this trait. The default implementation uses `reqwest` with
//! rustls.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ResolverError;

/// A fetched URL: status, headers, and body. Import views keep the
/// status and headers alongside the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Fetches URL content for the `http`, `github`, and `registry` resolvers.
#[async_trait]
pub trait UrlFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, url: &str) -> Result<UrlResponse, ResolverError>;
}

/// The default fetcher.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<UrlResponse, ResolverError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ResolverError::Fetch {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let body = response.text().await.map_err(|err| ResolverError::Fetch {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        if status >= 400 {
            return Err(ResolverError::Fetch {
                url: url.to_string(),
                message: format!("status {status}"),
            });
        }

        Ok(UrlResponse {
            status,
            headers,
            body,
        })
    }
}

/// A canned fetcher for tests: URL → response.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: BTreeMap<String, UrlResponse>,
}

impl StaticFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.responses.insert(
            url.into(),
            UrlResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: body.into(),
            },
        );
    }
}

#[async_trait]
impl UrlFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<UrlResponse, ResolverError> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| ResolverError::Fetch {
                url: url.to_string(),
                message: "no canned response".to_string(),
            })
    }
}
