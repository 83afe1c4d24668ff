//! Bounded seen-set with per-entry expiry.
//!
//! Backs two suppression mechanisms in the store: tombstones for closed
//! rooms (minutes-scale TTL) and the duplicate-delivery guard for kick/ban
//! events (seconds-scale TTL). Entries expire lazily on lookup and the LRU
//! bound keeps the set from growing without limit under event floods.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// A bounded set whose entries disappear after a fixed TTL.
pub struct ExpiringSet<K: Hash + Eq> {
    entries: LruCache<K, Instant>,
    ttl: Duration,
}

impl<K: Hash + Eq> ExpiringSet<K> {
    /// Create a set holding at most `capacity` live entries, each expiring
    /// `ttl` after insertion. A zero capacity is rounded up to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    /// Insert a key, refreshing its deadline if already present.
    pub fn insert(&mut self, key: K) {
        self.entries.put(key, Instant::now() + self.ttl);
    }

    /// Whether the key is present and not yet expired. Expired entries are
    /// removed on the way out.
    pub fn contains(&mut self, key: &K) -> bool {
        match self.entries.peek(key) {
            Some(deadline) if *deadline > Instant::now() => true,
            Some(_) => {
                self.entries.pop(key);
                false
            }
            None => false,
        }
    }

    /// Insert the key if it is not already live. Returns `true` when the key
    /// was fresh — i.e. the caller is seeing it for the first time within
    /// the TTL window.
    pub fn insert_if_fresh(&mut self, key: K) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.insert(key);
        true
    }

    /// Number of tracked entries, including any not yet lazily pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
