//! Duplicate-suppression cache.
//!
//! A bounded LRU set of [`PubId`]s. A publication id is recorded before any
//! forwarding decision; once present it is never forwarded again. LRU
//! eviction combined with monotonic sequence numbers makes time-based
//! expiry unnecessary.

use crate::ids::PubId;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Default capacity, sized for the expected number of publications in two
/// round-trip times.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded LRU set of observed publication ids.
pub struct PubCache {
    inner: LruCache<PubId, ()>,
}

impl PubCache {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// True when `id` has been observed and not yet evicted.
    ///
    /// Does not refresh recency.
    #[must_use]
    pub fn contains(&self, id: &PubId) -> bool {
        self.inner.contains(id)
    }

    /// Records `id` as observed, evicting the least recently used entry
    /// when full. Returns true when the id was not already present.
    pub fn insert(&mut self, id: PubId) -> bool {
        self.inner.put(id, ()).is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for PubCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let mut cache = PubCache::new(10);
        let id = PubId::new(1, 0);

        assert!(!cache.contains(&id));
        assert!(cache.insert(id));
        assert!(cache.contains(&id));
        assert!(!cache.insert(id));
    }

    #[test]
    fn evicts_least_recent() {
        let mut cache = PubCache::new(2);
        let a = PubId::new(1, 0);
        let b = PubId::new(1, 1);
        let c = PubId::new(1, 2);

        cache.insert(a);
        cache.insert(b);
        cache.insert(c);

        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let mut cache = PubCache::new(0);
        cache.insert(PubId::new(1, 0));
        assert_eq!(cache.len(), 1);
    }
}
