//! Rendered document cache.
//!
//! One LRU list guarded by a mutex, bounded by entry count and summed payload size. Entries carry
//! their creation instant and are dropped lazily once older than the configured TTL.

use std::sync::Mutex;

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use crate::util::bytes::ByteSize;
use crate::util::lock::mutex_lock;

use super::config::CacheConfig;
use super::keys::CacheKey;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "pressroom_cache_hit_total";
const METRIC_CACHE_MISS: &str = "pressroom_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "pressroom_cache_evict_total";
const METRIC_CACHE_EXPIRED: &str = "pressroom_cache_expired_total";

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A previously rendered document.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Bytes,
    pub content_type: &'static str,
    /// Filename suggested by the request that produced the entry.
    pub suggested_filename: String,
    pub created_at: Instant,
}

impl CacheEntry {
    pub fn pdf(key: CacheKey, payload: Bytes, suggested_filename: impl Into<String>) -> Self {
        Self {
            key,
            payload,
            content_type: PDF_CONTENT_TYPE,
            suggested_filename: suggested_filename.into(),
            created_at: Instant::now(),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: usize,
}

impl Inner {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_bytes -= entry.size_bytes();
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<CacheEntry> {
        let (_, entry) = self.entries.pop_lru()?;
        self.total_bytes -= entry.size_bytes();
        Some(entry)
    }
}

pub struct ResultCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry. A hit refreshes recency; an expired entry is removed and reported
    /// as absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.config.enabled {
            counter!(METRIC_CACHE_MISS).increment(1);
            return None;
        }

        let mut inner = mutex_lock(&self.inner, SOURCE, "get");
        let expired = match inner.entries.get(key) {
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                return None;
            }
            Some(entry) => self.is_expired(entry),
        };

        if expired {
            inner.remove(key);
            counter!(METRIC_CACHE_EXPIRED).increment(1);
            counter!(METRIC_CACHE_MISS).increment(1);
            debug!(
                target = SOURCE,
                op = "get",
                result = "expired",
                cache_key = %key,
                "Dropped expired cache entry"
            );
            return None;
        }

        counter!(METRIC_CACHE_HIT).increment(1);
        inner.entries.peek(key).cloned()
    }

    /// Store an entry, then evict least recently used entries until both bounds hold.
    pub fn put(&self, entry: CacheEntry) {
        if !self.config.enabled {
            return;
        }

        let size = entry.size_bytes();
        let key = entry.key.clone();
        let mut inner = mutex_lock(&self.inner, SOURCE, "put");

        self.purge_expired(&mut inner);
        inner.remove(&key);

        if size > self.config.max_bytes {
            debug!(
                target = SOURCE,
                op = "put",
                result = "skipped_oversize",
                cache_key = %key,
                size = %ByteSize(size),
                max = %ByteSize(self.config.max_bytes),
                "Entry exceeds cache byte budget"
            );
            return;
        }

        inner.total_bytes += size;
        inner.entries.put(key, entry);

        while inner.entries.len() > self.config.max_entries
            || inner.total_bytes > self.config.max_bytes
        {
            let Some(evicted) = inner.pop_lru() else {
                break;
            };
            counter!(METRIC_CACHE_EVICT).increment(1);
            debug!(
                target = SOURCE,
                op = "evict",
                result = "ok",
                cache_key = %evicted.key,
                freed = %ByteSize(evicted.size_bytes()),
                total = %ByteSize(inner.total_bytes),
                entries = inner.entries.len(),
                "Evicted cache entry"
            );
        }
    }

    pub fn clear(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "clear");
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = mutex_lock(&self.inner, SOURCE, "stats");
        CacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.total_bytes,
            max_entries: self.config.max_entries,
            max_bytes: self.config.max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.created_at.elapsed() > self.config.ttl
    }

    fn purge_expired(&self, inner: &mut Inner) {
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            inner.remove(&key);
            counter!(METRIC_CACHE_EXPIRED).increment(1);
        }
    }
}
