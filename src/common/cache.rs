//! In-memory cache for decoded job specs on the edge.
//!
//! Uses moka's concurrent cache implementation.

use std::sync::Arc;

use moka::sync::Cache;

/// Thread-safe in-memory cache with configurable capacity.
///
/// Entries beyond the capacity are evicted, so callers must be able to
/// rebuild a value on a miss.
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
        }
    }

    /// Returns the cached value, or builds, stores and returns a new one.
    ///
    /// Concurrent callers for the same key share a single `init` run. A failed
    /// `init` caches nothing.
    pub fn get_or_try_insert<E>(
        &self,
        key: K,
        init: impl FnOnce() -> std::result::Result<V, E>,
    ) -> std::result::Result<V, E>
    where
        E: Clone + Send + Sync + 'static,
    {
        self.entries.try_get_with(key, init).map_err(Arc::unwrap_or_clone)
    }
}
