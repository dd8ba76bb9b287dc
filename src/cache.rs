//! Content cache: memoized pipeline output keyed by a digest of (content, scope, options), with
//! per-entry TTL. Construct one per process and share it by `Arc`; the periodic sweep is an
//! explicit task started with [`spawn_cleanup`].
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;

use crate::error::TrellisError;

pub const CACHE_KEY_PREFIX: &str = "markdown";

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

pub struct ContentCache<T: Clone> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> Default for ContentCache<T> {
    fn default() -> Self {
        ContentCache {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ContentCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a live entry. An expired entry is evicted on the way out.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        {
            let reader = self.entries.read();
            match reader.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        let mut writer = self.entries.write();
        if writer
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            writer.remove(key);
            tracing::trace!("[ContentCache::get] evicted expired entry {key}");
        }
        None
    }

    pub fn set(&self, key: String, value: T, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .insert(key, CacheEntry { value, expires_at });
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut writer = self.entries.write();
        let before = writer.len();
        writer.retain(|_, entry| entry.expires_at > now);
        before - writer.len()
    }

    /// Entry count, expired entries included until they are swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a, O: Serialize> {
    content: &'a str,
    scope: &'a str,
    options: &'a O,
}

/// `markdown:{sha256}` over a stable JSON serialization of the key material. `scope` carries
/// whatever else changes the output for identical content, such as the slug and corpus
/// fingerprint.
pub fn content_key<O: Serialize>(
    content: &str,
    scope: &str,
    options: &O,
) -> Result<String, TrellisError> {
    let material = serde_json::to_vec(&KeyMaterial {
        content,
        scope,
        options,
    })?;
    let digest = Sha256::digest(&material);
    Ok(format!("{CACHE_KEY_PREFIX}:{}", hex::encode(digest)))
}

/// Sweep `cache` every `interval` until the returned handle is aborted. The first sweep happens
/// one interval after the call.
pub fn spawn_cleanup<T>(cache: Arc<ContentCache<T>>, interval: Duration) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.cleanup();
            if removed > 0 {
                tracing::debug!("[ContentCache] swept {removed} expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn expired_entries_are_lazily_evicted() {
        let cache = ContentCache::new();
        cache.set("live".to_string(), 1, Duration::from_secs(60));
        cache.set("dead".to_string(), 2, Duration::ZERO);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("live"), Some(1));
        assert_eq!(cache.get("dead"), None);
        assert_eq!(cache.len(), 1);
        assert!(cache.delete("live"));
        assert!(cache.is_empty());
    }

    #[test]
    fn cleanup_counts_removed() {
        let cache = ContentCache::new();
        for i in 0..3 {
            cache.set(format!("old{i}"), i, Duration::ZERO);
        }
        cache.set("new".to_string(), 9, Duration::from_secs(60));
        assert_eq!(cache.cleanup(), 3);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_depend_on_options() {
        let a = content_key("# x", "slug", &("diagrams", true)).expect("key");
        let b = content_key("# x", "slug", &("diagrams", false)).expect("key");
        let c = content_key("# x", "other", &("diagrams", true)).expect("key");
        assert!(a.starts_with("markdown:"));
        assert_eq!(a.len(), "markdown:".len() + 64);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, content_key("# x", "slug", &("diagrams", true)).expect("key"));
    }

    #[test_log::test(tokio::test)]
    async fn background_sweep() {
        let cache = Arc::new(ContentCache::new());
        cache.set("gone".to_string(), 1, Duration::ZERO);
        let handle = spawn_cleanup(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());
        handle.abort();
    }
}
