//! Insertion-ordered key-value map with byte-budget eviction.
//!
//! `OrderedMap` pairs a hash index with an arena-backed linked list so that
//! lookups and ordered traversal are both O(1) per step. A single
//! structure-wide reader/writer lock provides the concurrency contract:
//! reads run concurrently, mutations are exclusive, and every operation is
//! linearizable with respect to lock acquisition order.
//!
//! When constructed with a byte ceiling, each `set` estimates the incoming
//! value's size via [`ByteSize`]. A value larger than the ceiling by itself
//! is rejected; a value that would push the running total over the ceiling
//! clears the *entire* map first and then inserts. This is a deliberate
//! all-or-nothing reset, not per-entry LRU.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::list::{NodeId, OrderedList};
use crate::size::{ByteSize, BYTES_PER_MIB};

pub(crate) struct MapCore<K, V> {
    pub(crate) index: HashMap<K, NodeId>,
    pub(crate) list: OrderedList<K, V>,
    pub(crate) total_size: i64,
    pub(crate) limit: i64,
}

impl<K: Clone, V: Clone> Clone for MapCore<K, V> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            list: self.list.clone(),
            total_size: self.total_size,
            limit: self.limit,
        }
    }
}

/// Thread-safe, insertion-ordered map with an optional byte-size ceiling.
pub struct OrderedMap<K, V> {
    pub(crate) core: RwLock<MapCore<K, V>>,
}

impl<K, V> OrderedMap<K, V> {
    /// Creates an unbounded map. No size estimation is performed and
    /// entries record a size of 0.
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
            core: RwLock::new(MapCore {
                index: HashMap::new(),
                list: OrderedList::new(),
                total_size: 0,
                limit,
            }),
        }
    }

    /// Configured byte ceiling; non-positive means unbounded.
    pub fn limit(&self) -> i64 {
        self.core.read().limit
    }

    /// Running approximate byte total. Always 0 on unbounded maps.
    pub fn total_size(&self) -> i64 {
        self.core.read().total_size
    }

    pub fn len(&self) -> usize {
        self.core.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry and resets the running total.
    pub fn clear(&self) {
        let mut guard = self.core.write();
        let core = &mut *guard;
        core.index.clear();
        core.list.clear();
        core.total_size = 0;
    }
}

impl<K: Eq + Hash, V> OrderedMap<K, V> {
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let core = self.core.read();
        let id = *core.index.get(key)?;
        core.list.node(id).map(|n| n.value.clone())
    }

    /// First value found among `keys`, probed in the order given, under a
    /// single lock acquisition.
    pub fn get_any(&self, keys: &[K]) -> Option<V>
    where
        V: Clone,
    {
        let core = self.core.read();
        for key in keys {
            if let Some(&id) = core.index.get(key) {
                if let Some(node) = core.list.node(id) {
                    return Some(node.value.clone());
                }
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
        self.core.read().index.contains_key(key)
    }

    /// Inserts or updates an entry.
    ///
    /// Updating a present key keeps its position in the iteration order.
    /// On a bounded map, a value whose own estimated size exceeds the
    /// ceiling fails with [`StoreError::SizeExceeded`] and mutates nothing;
    /// a value that would push the running total past the ceiling clears
    /// the whole map before the insert.
    pub fn set(&self, key: K, value: V) -> StoreResult<()>
    where
        K: Clone,
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
            let prior = core
                .index
                .get(&key)
                .and_then(|id| core.list.node(*id))
                .map(|n| n.size)
                .unwrap_or(0);
            if core.total_size - prior + size > core.limit {
                tracing::debug!(
                    "byte budget reached (total={}, incoming={}, limit={}), evicting {} entries",
                    core.total_size,
                    size,
                    core.limit,
                    core.index.len(),
                );
                core.index.clear();
                core.list.clear();
                core.total_size = 0;
            }
        }
        if let Some(&id) = core.index.get(&key) {
            if let Some(node) = core.list.node_mut(id) {
                core.total_size += size - node.size;
                node.value = value;
                node.size = size;
            }
            return Ok(());
        }
        let id = core.list.push_back_sized(key.clone(), value, size);
        core.index.insert(key, id);
        core.total_size += size;
        Ok(())
    }

    /// Removes `key` from both the index and the ordering; returns whether
    /// an entry was removed.
    pub fn delete(&self, key: &K) -> bool {
        let mut guard = self.core.write();
        let core = &mut *guard;
        match core.index.remove(key) {
            Some(id) => {
                if let Some(node) = core.list.remove_node(id) {
                    core.total_size -= node.size;
                }
                true
            }
            None => false,
        }
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let core = self.core.read();
        core.list.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Values in insertion order.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let core = self.core.read();
        core.list.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Oldest entry.
    pub fn front(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let core = self.core.read();
        let id = core.list.front()?;
        core.list.get(id).map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Newest entry.
    pub fn back(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let core = self.core.read();
        let id = core.list.back()?;
        core.list.get(id).map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Visits entries front-to-back until `visitor` returns `false`.
    ///
    /// The read lock is held for the whole traversal; the visitor must not
    /// call back into the same map (the lock is not re-entrant).
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let core = self.core.read();
        for (k, v) in core.list.iter() {
            if !visitor(k, v) {
                break;
            }
        }
    }

    /// Independent structural copy: same entries, same order, same limit
    /// and recorded sizes.
    pub fn copy(&self) -> Self
    where
        K: Clone,
        V: Clone,
    {
        let core = self.core.read();
        OrderedMap {
            core: RwLock::new((*core).clone()),
        }
    }
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
