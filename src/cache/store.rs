//! Bounded LRU response store with per-entry expiry.

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode};
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Request identity: method plus the request target exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub target: String,
}

impl CacheKey {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.target)
    }
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

struct Slot {
    response: CachedResponse,
    expires_at: Instant,
}

/// Counters exposed through the admin API.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Response cache shared by all proxy listeners.
///
/// Present entries always have `expires_at > now` from the reader's point of
/// view: an expired entry is removed by the read that finds it.
pub struct ResponseCache {
    entries: Mutex<LruCache<CacheKey, Slot>>,
    capacity: NonZeroUsize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up an unexpired entry, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(slot.response.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            tracing::debug!(key = %key, "Evicted expired cache entry");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite `key`, evicting the least recently used entry
    /// when full. A zero TTL removes any existing entry instead.
    pub fn put(&self, key: CacheKey, response: CachedResponse, ttl: Duration) {
        if ttl.is_zero() {
            self.invalidate(&key);
            return;
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            tracing::debug!(key = %key, "TTL out of range, response not cached");
            self.invalidate(&key);
            return;
        };
        let slot = Slot {
            response,
            expires_at,
        };
        let mut entries = self.lock();
        if let Some((displaced, _)) = entries.push(key.clone(), slot) {
            if displaced != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(evicted = %displaced, "Cache full, evicted least recently used entry");
            }
        }
        tracing::trace!(key = %key, ttl_secs = ttl.as_secs(), "Cached response");
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().pop(key).is_some()
    }

    /// Remove every entry. Returns how many were dropped.
    pub fn flush(&self) -> usize {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Drop every expired entry without touching recency order.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity.get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
