//! Adapter over the bounded LRU primitive.
//!
//! The rest of the system consumes capacity-bound storage only through
//! this get/set/delete/clear contract. Recency tracking and capacity
//! enforcement belong to the primitive; this adapter adds TTL expiry by
//! stamping entries with their write time and treating expired entries
//! as absent on read.

use std::hash::Hash;
use std::time::{Duration, Instant};

use lru::LruCache;
use strata_core::CachePolicy;

struct Entry<V> {
    value: V,
    written_at: Instant,
}

/// Capacity- and TTL-bound map built from one [`CachePolicy`].
pub(crate) struct BoundedCache<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    pub fn new(policy: &CachePolicy) -> Self {
        Self {
            entries: LruCache::new(policy.max_entries),
            ttl: policy.ttl,
        }
    }

    /// Write `value` under `key`, overwriting unconditionally.
    pub fn set(&mut self, key: K, value: V) {
        self.entries.put(
            key,
            Entry {
                value,
                written_at: Instant::now(),
            },
        );
    }

    /// Read the live value under `key`, promoting its recency.
    /// Expired entries read as absent and are dropped.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.is_expired(key) {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Remove the entry under `key`. Returns whether one existed.
    pub fn delete(&mut self, key: &K) -> bool {
        self.entries.pop(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_expired(&self, key: &K) -> bool {
        match (self.ttl, self.entries.peek(key)) {
            (Some(ttl), Some(entry)) => entry.written_at.elapsed() > ttl,
            _ => false,
        }
    }
}
