//! Caches for resolved content.
//!
//! Three stores: a content-addressed cache keyed by SHA-256 (with import
//! approval flags, so approval survives a re-fetch of identical content),
//! a URL cache with per-entry TTL, and a per-environment memo for computed
//! resolver variables. Concurrent fetches for the same URL coalesce onto a
//! single in-flight future.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

/// A lowercase hex SHA-256 digest of cached content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the given content.
    #[must_use]
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct ContentEntry {
    content: String,
    approved: bool,
}

/// Content-addressed cache with approval flags.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: RwLock<HashMap<ContentHash, ContentEntry>>,
}

impl ContentCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store content and return its hash. Re-storing identical content
    /// keeps the existing approval flag.
    pub fn store(&self, content: &str) -> ContentHash {
        let hash = ContentHash::of(content);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.entry(hash.clone()).or_insert_with(|| ContentEntry {
            content: content.to_string(),
            approved: false,
        });
        hash
    }

    #[must_use]
    pub fn get(&self, hash: &ContentHash) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(hash).map(|entry| entry.content.clone())
    }

    /// Mark the hash as approved for import.
    pub fn mark_approved(&self, hash: &ContentHash) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(hash) {
            entry.approved = true;
        }
    }

    /// Whether this hash has previously passed the approval gate.
    #[must_use]
    pub fn is_approved(&self, hash: &ContentHash) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(hash).is_some_and(|entry| entry.approved)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Debug, Clone)]
struct UrlEntry {
    content: String,
    fetched_at: Instant,
    ttl: Duration,
}

/// URL cache with per-entry TTL and in-flight coalescing.
pub struct UrlCache {
    entries: RwLock<HashMap<String, UrlEntry>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<Result<String, String>>>>>,
}

impl std::fmt::Debug for UrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("UrlCache")
            .field("entries", &entries.len())
            .finish_non_exhaustive()
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached content for `url` if present and unexpired.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(url)?;
        if entry.fetched_at.elapsed() > entry.ttl {
            return None;
        }
        Some(entry.content.clone())
    }

    pub fn insert(&self, url: impl Into<String>, content: impl Into<String>, ttl: Duration) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            url.into(),
            UrlEntry {
                content: content.into(),
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Get the cached value or run `fetch`, coalescing concurrent fetches
    /// for the same URL onto one in-flight future.
    ///
    /// # Errors
    ///
    /// Propagates the error string produced by `fetch`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        url: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<String, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, String>>,
    {
        if let Some(content) = self.get(url) {
            return Ok(content);
        }

        let cell = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            in_flight
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| async {
                let result = fetch().await;
                if let Ok(content) = &result {
                    self.insert(url, content.clone(), ttl);
                }
                result
            })
            .await
            .clone();

        // The slot has settled; drop it so expiry triggers a fresh fetch.
        // Only remove our own cell in case a newer fetch already replaced it.
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(url).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            in_flight.remove(url);
        }

        result
    }
}

/// Per-environment memo of computed resolver variables, keyed by the
/// reserved name (`now`, `debug`, ...).
#[derive(Debug, Default)]
pub struct ResolverVariableCache {
    values: RwLock<HashMap<String, String>>,
}

impl ResolverVariableCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    pub fn clear(&self) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn content_cache_approval_survives_restore() {
        let cache = ContentCache::new();
        let hash = cache.store("module body");
        assert!(!cache.is_approved(&hash));

        cache.mark_approved(&hash);
        let again = cache.store("module body");
        assert_eq!(hash, again);
        assert!(cache.is_approved(&again));
    }

    #[test]
    fn url_cache_expires() {
        let cache = UrlCache::new();
        cache.insert("https://x", "body", Duration::from_secs(0));
        // A zero TTL is expired by the next lookup.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("https://x"), None);

        cache.insert("https://x", "body", Duration::from_secs(60));
        assert_eq!(cache.get("https://x"), Some("body".to_string()));
    }

    #[tokio::test]
    async fn concurrent_fetches_coalesce() {
        let cache = Arc::new(UrlCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("https://example.com/mod", Duration::from_secs(60), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("fetched".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.expect("join"), Ok("fetched".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolver_variable_memo() {
        let cache = ResolverVariableCache::new();
        assert_eq!(cache.get("now"), None);
        cache.insert("now", "2026-08-01T00:00:00Z");
        assert_eq!(cache.get("now"), Some("2026-08-01T00:00:00Z".to_string()));
    }
}
