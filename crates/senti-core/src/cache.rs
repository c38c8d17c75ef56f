use crate::clock::Clock;
use crate::key::CacheKey;
use crate::models::{AnalysisResult, CacheStats};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: AnalysisResult,
    expires_at: DateTime<Utc>,
}

/// An entry as written to, or read back from, durable storage.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub result: AnalysisResult,
    pub expires_at: DateTime<Utc>,
}

/// Content-keyed result cache with per-entry expiry and LRU eviction
/// bounded by entry count.
///
/// All access goes through one mutex: a lookup updates recency, so even
/// reads mutate the LRU order. Entries are whole values, so a reader never
/// sees a partial insert and concurrent puts to one key are last-write-wins.
pub struct CacheStore {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStore {
    pub fn new(max_entries: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            default_ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a key. Expired entries are dropped and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<AnalysisResult> {
        let now = self.clock.now();
        let mut cache = self.inner.lock();

        let found = match cache.get(key) {
            Some(entry) if now <= entry.expires_at => Some(entry.result.clone()),
            Some(_) => {
                cache.pop(key);
                debug!(%key, "cache entry expired");
                None
            }
            None => None,
        };
        drop(cache);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "cache miss");
        }
        found
    }

    /// Insert or overwrite. `None` uses the configured default TTL. A TTL
    /// running past the end of representable time never expires.
    pub fn put(&self, key: CacheKey, result: AnalysisResult, ttl: Option<Duration>) {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl.unwrap_or(self.default_ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.insert(key, CacheEntry { result, expires_at });
    }

    fn insert(&self, key: CacheKey, entry: CacheEntry) {
        let mut cache = self.inner.lock();
        let displaced = cache.push(key.clone(), entry);
        drop(cache);

        // `push` also returns the old value when overwriting the same key.
        if let Some((evicted, _)) = displaced {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %evicted, "evicted least-recently-used cache entry");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            size: self.inner.lock().len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut cache = self.inner.lock();
        let expired: Vec<CacheKey> = cache
            .iter()
            .filter(|(_, entry)| now > entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    /// Live entries ordered least- to most-recently used, for flushing.
    pub fn snapshot(&self) -> Vec<StoredEntry> {
        let now = self.clock.now();
        let cache = self.inner.lock();
        let mut entries: Vec<StoredEntry> = cache
            .iter()
            .filter(|(_, entry)| now <= entry.expires_at)
            .map(|(key, entry)| StoredEntry {
                key: key.clone(),
                result: entry.result.clone(),
                expires_at: entry.expires_at,
            })
            .collect();
        entries.reverse();
        entries
    }

    /// Load entries in least- to most-recently-used order, skipping expired
    /// ones. Returns how many were loaded.
    pub fn restore(&self, entries: Vec<StoredEntry>) -> usize {
        let now = self.clock.now();
        let mut loaded = 0;
        for stored in entries {
            if now > stored.expires_at {
                continue;
            }
            self.insert(
                stored.key,
                CacheEntry {
                    result: stored.result,
                    expires_at: stored.expires_at,
                },
            );
            loaded += 1;
        }
        loaded
    }
}
