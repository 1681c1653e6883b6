/*!
 * Bounded TTL response cache
 *
 * Entries live in a concurrent map so reads never block each other. Only the
 * admission path (inserting a new key) is serialized, which keeps the entry
 * count within capacity. When full, expired entries are swept; if the cache
 * is still full the insert is rejected rather than evicting a live entry.
 */

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default number of entries
pub const DEFAULT_CAPACITY: usize = 200;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub rejected: u64,
}

impl CacheStats {
    /// Fraction of lookups that were hits (0.0 when nothing was looked up)
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "In-memory cache size: {}/{}", self.size, self.capacity)
    }
}

/// Capacity-bounded, TTL-based key/value cache shared across repositories
pub struct ResponseCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    capacity: usize,
    default_ttl: Duration,
    admission: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    rejected: AtomicU64,
}

impl<K, V> fmt::Debug for ResponseCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("size", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl<K, V> Default for ResponseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
            default_ttl,
            admission: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry; an expired entry is a miss and is dropped
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` under `key` for `ttl`
    ///
    /// Returns false when the cache is full of live entries and `key` is not
    /// already present.
    pub fn put(&self, key: K, value: V, ttl: Duration) -> bool {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };

        let _admission = self
            .admission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let purged = self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    capacity = self.capacity,
                    purged, "Response cache full, rejecting insert"
                );
                return false;
            }
        }

        self.entries.insert(key, entry);
        true
    }

    /// Store `value` with the cache's default TTL
    pub fn insert(&self, key: K, value: V) -> bool {
        self.put(key, value, self.default_ttl)
    }

    /// Remove one entry; returns whether it was present
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry (counters are kept)
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
