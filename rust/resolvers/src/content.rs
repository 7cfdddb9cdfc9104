//! Resolved content.

use serde::{Deserialize, Serialize};

/// What kind of content a resolver produced.
///
/// Modules are re-parsed and evaluated by the import pipeline; data is
/// JSON-decoded on demand; text is used as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Module,
    Data,
    Text,
}

/// Provenance attached to resolved content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// The resolver-specific source (path, URL, registry coordinate).
    pub source: String,
    /// When the content was produced, RFC 3339.
    pub timestamp: String,
    /// Content hash; function resolvers omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ContentMetadata {
    #[must_use]
    pub fn now(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            hash: None,
        }
    }

    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

/// The payload a resolver returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverContent {
    pub content: String,
    pub content_type: ContentType,
    pub metadata: ContentMetadata,
}

impl ResolverContent {
    #[must_use]
    pub fn module(content: impl Into<String>, source: impl Into<String>) -> Self {
        let content = content.into();
        let hash = mlld_cache::ContentHash::of(&content).to_string();
        Self {
            content,
            content_type: ContentType::Module,
            metadata: ContentMetadata::now(source).with_hash(hash),
        }
    }

    #[must_use]
    pub fn data(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Data,
            metadata: ContentMetadata::now(source),
        }
    }

    #[must_use]
    pub fn text(content: impl Into<String>, source: impl Into<String>) -> Self {
        let content = content.into();
        let hash = mlld_cache::ContentHash::of(&content).to_string();
        Self {
            content,
            content_type: ContentType::Text,
            metadata: ContentMetadata::now(source).with_hash(hash),
        }
    }
}
