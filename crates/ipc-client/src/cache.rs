//! TTL + LRU response cache for read-only methods.
//!
//! Entries are keyed by method name plus the compact JSON of the params, so
//! `eth_getBalance ["0xabc","latest"]` and `["0xabc","0x10"]` never share a
//! slot. Expired entries are removed lazily on lookup and in bulk by
//! [`ResponseCache::purge_expired`].

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// Counters reported by [`ResponseCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries pushed out by capacity pressure.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

pub struct ResponseCache {
    entries: LruCache<String, CacheEntry>,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl ResponseCache {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            default_ttl,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Cache key for a call. Params are rendered as compact JSON.
    pub fn key(method: &str, params: &Value) -> String {
        format!("{method}:{params}")
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`. A hit refreshes recency; an expired entry
    /// is removed and counts as a miss.
    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<Value> {
        let expired = match self.entries.peek(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            self.entries.pop(key);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&mut self, key: String, value: Value) {
        let ttl = self.default_ttl;
        self.put_with_ttl(key, value, ttl);
    }

    /// Insert or overwrite. Evicts the least recently used entry when full.
    pub fn put_with_ttl(&mut self, key: String, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                self.evictions += 1;
                tracing::trace!(key = %evicted, "cache eviction");
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        self.expirations += stale.len() as u64;
        stale.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.entries.len(),
            capacity: self.entries.cap().get(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }
}
