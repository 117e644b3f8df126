//! In-process cache on a concurrent hash map.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture, FutureExt};

use crate::cache::{CacheKey, CachedImage, ImageCache};
use crate::config::CacheConfig;
use crate::observability::metrics;

#[derive(Debug, Clone)]
struct Entry {
    image: CachedImage,
    expires_at: Instant,
}

/// Bounded TTL cache. Expired entries are dropped on read and when the
/// table is full; a full table of live entries refuses new ones.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<CacheKey, Entry>>,
    max_entries: usize,
    max_entry_bytes: usize,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: config.max_entries,
            max_entry_bytes: config.max_entry_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedImage> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.image.clone());
        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        metrics::record_cache_lookup(hit.is_some());
        hit
    }

    fn store(&self, key: CacheKey, image: CachedImage, ttl: Duration) {
        if image.body.len() > self.max_entry_bytes {
            tracing::trace!(url = %key.url, size = image.body.len(), "Not caching oversized image");
            return;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let now = Instant::now();
            self.entries.retain(|_, entry| entry.expires_at > now);
            if self.entries.len() >= self.max_entries {
                tracing::debug!(entries = self.entries.len(), "Cache full, skipping insert");
                return;
            }
        }
        self.entries.insert(
            key,
            Entry {
                image,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl ImageCache for MemoryCache {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Option<CachedImage>> {
        future::ready(self.lookup(key)).boxed()
    }

    fn set_with_ttl<'a>(&'a self, key: CacheKey, image: CachedImage, ttl: Duration) -> BoxFuture<'a, ()> {
        self.store(key, image, ttl);
        future::ready(()).boxed()
    }

    fn delete<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, ()> {
        self.entries.remove(key);
        future::ready(()).boxed()
    }
}
