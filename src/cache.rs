//! Bounded least-recently-used cache shared by the provider simulators.
//!
//! Every operation runs under one mutex, so a lookup and the recency bump it
//! causes are a single atomic step even when handlers run on many threads.

use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::error::CacheError;

/// Fixed-capacity key/value store with least-recently-touched eviction.
///
/// Both `get` and `put` count as a touch; `contains` does not.
pub struct BoundedRecencyCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K, V> BoundedRecencyCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite `key`, making it the most recent entry.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn put(&self, key: K, value: V) -> Option<K> {
        let mut inner = self.lock();
        if inner.contains(&key) {
            inner.put(key, value);
            return None;
        }
        inner.push(key, value).map(|(evicted, _)| evicted)
    }

    /// Fetch a value and mark it most recently used.
    pub fn get(&self, key: &K) -> Result<V, CacheError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("{key:?}")))
    }

    /// Membership check; leaves recency untouched.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    /// Snapshot of all values, least recently used first. Not a touch.
    pub fn values(&self) -> Vec<V> {
        self.lock().iter().rev().map(|(_, v)| v.clone()).collect()
    }

    /// Keys, least recently used first. Not a touch.
    pub fn keys(&self) -> Vec<K> {
        self.lock().iter().rev().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}
