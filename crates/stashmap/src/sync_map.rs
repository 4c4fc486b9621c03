//! Unordered sibling of [`OrderedMap`](crate::OrderedMap).
//!
//! Same reader/writer locking discipline and the same all-or-nothing byte
//! budget, without the linked ordering: iteration order is arbitrary.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::size::{ByteSize, BYTES_PER_MIB};

#[derive(Debug, Clone)]
pub(crate) struct Entry<V> {
    pub(crate) value: V,
    pub(crate) size: i64,
}

pub(crate) struct SyncCore<K, V> {
    pub(crate) items: HashMap<K, Entry<V>>,
    pub(crate) total_size: i64,
    pub(crate) limit: i64,
}

/// Thread-safe hash map with an optional byte-size ceiling.
pub struct SyncMap<K, V> {
    pub(crate) core: RwLock<SyncCore<K, V>>,
}

impl<K, V> SyncMap<K, V> {
    /// Creates an unbounded map.
    pub fn new() -> Self {
        Self::with_limit_bytes(-1)
    }

    /// Creates a map bounded to `limit_mb` mebibytes. A non-positive value
    /// means unbounded.
    pub fn with_limit_mb(limit_mb: i64) -> Self {
        if limit_mb > 0 {
            Self::with_limit_bytes(limit_mb * BYTES_PER_MIB)
        } else {
            Self::with_limit_bytes(-1)
        }
    }

    fn with_limit_bytes(limit: i64) -> Self {
        Self {
            core: RwLock::new(SyncCore {
                items: HashMap::new(),
                total_size: 0,
                limit,
            }),
        }
    }

    pub fn limit(&self) -> i64 {
        self.core.read().limit
    }

    pub fn total_size(&self) -> i64 {
        self.core.read().total_size
    }

    pub fn len(&self) -> usize {
        self.core.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut guard = self.core.write();
        guard.items.clear();
        guard.total_size = 0;
    }
}

impl<K: Eq + Hash, V> SyncMap<K, V> {
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.core.read().items.get(key).map(|e| e.value.clone())
    }

    /// First value found among `keys`, probed in the order given.
    pub fn get_any(&self, keys: &[K]) -> Option<V>
    where
        V: Clone,
    {
        let core = self.core.read();
        for key in keys {
            if let Some(entry) = core.items.get(key) {
                return Some(entry.value.clone());
            }
        }
        None
    }

    pub fn get_or_default(&self, key: &K, default: V) -> V
    where
        V: Clone,
    {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.core.read().items.contains_key(key)
    }

    /// Inserts or updates an entry under the same eviction contract as
    /// [`OrderedMap::set`](crate::OrderedMap::set).
    pub fn set(&self, key: K, value: V) -> StoreResult<()>
    where
        V: ByteSize,
    {
        let mut guard = self.core.write();
        let core = &mut *guard;
        let mut size = 0i64;
        if core.limit > 0 {
            size = value.approx_bytes();
            if size > core.limit {
                return Err(StoreError::SizeExceeded {
                    size,
                    limit: core.limit,
                });
            }
            let prior = core.items.get(&key).map(|e| e.size).unwrap_or(0);
            if core.total_size - prior + size > core.limit {
                tracing::debug!(
                    "byte budget reached (total={}, incoming={}, limit={}), evicting {} entries",
                    core.total_size,
                    size,
                    core.limit,
                    core.items.len(),
                );
                core.items.clear();
                core.total_size = 0;
            }
        }
        let prior = core.items.insert(key, Entry { value, size }).map(|e| e.size).unwrap_or(0);
        core.total_size += size - prior;
        Ok(())
    }

    /// Removes `key`; returns whether an entry was removed.
    pub fn delete(&self, key: &K) -> bool {
        let mut guard = self.core.write();
        let core = &mut *guard;
        match core.items.remove(key) {
            Some(entry) => {
                core.total_size -= entry.size;
                true
            }
            None => false,
        }
    }

    /// Keys in arbitrary order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.core.read().items.keys().cloned().collect()
    }

    /// Values in arbitrary order.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.core.read().items.values().map(|e| e.value.clone()).collect()
    }

    /// Visits entries in arbitrary order until `visitor` returns `false`.
    ///
    /// The read lock is held for the traversal; the visitor must not call
    /// back into the same map.
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let core = self.core.read();
        for (k, entry) in core.items.iter() {
            if !visitor(k, &entry.value) {
                break;
            }
        }
    }
}

impl<K, V> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
