//! Bounded concurrent cache (Hot Path)
//!
//! Fixed-capacity key/value store guarded by a `parking_lot::RwLock`.
//! Reads take the shared lock, writes the exclusive one. Recency lives in a
//! per-entry atomic so a hit can be recorded under the shared lock.
//!
//! Eviction picks the entry with the smallest `(last_access, inserted)` pair:
//! least recently accessed first, ties broken by the oldest insertion.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Which entry to drop when the cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum EvictionPolicy {
    /// Least recently accessed (get or set) entry goes first
    #[default]
    #[serde(rename = "LRU", alias = "lru", alias = "Lru")]
    Lru,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => f.write_str("LRU"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("lru") {
            Ok(EvictionPolicy::Lru)
        } else {
            Err(format!("unsupported eviction policy '{}'", s))
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,
}

struct CacheEntry<V> {
    value: V,
    /// Recency sequence, bumped on every hit and every write
    last_access: AtomicU64,
    /// Insertion sequence, used only to break recency ties
    inserted: u64,
}

struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    next_insert: u64,
}

/// Fixed-capacity LRU cache safe to share between worker threads
pub struct BoundedCache<V> {
    inner: RwLock<CacheInner<V>>,
    capacity: usize,
    policy: EvictionPolicy,
    clock: AtomicU64,
}

impl<V: Clone> BoundedCache<V> {
    /// Create an empty LRU cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        Self::with_policy(capacity, EvictionPolicy::Lru)
    }

    pub fn with_policy(capacity: usize, policy: EvictionPolicy) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        Ok(Self {
            inner: RwLock::new(CacheInner {
                map: HashMap::with_capacity(capacity),
                next_insert: 0,
            }),
            capacity,
            policy,
            clock: AtomicU64::new(0),
        })
    }

    #[inline(always)]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up `key`, returning a clone of the value and marking it recent
    pub fn get(&self, key: &str) -> Option<V> {
        let inner = self.inner.read();
        let entry = inner.map.get(key)?;
        entry.last_access.fetch_max(self.tick(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Insert or replace `key`
    ///
    /// When the cache is full and `key` is new, the least recently accessed
    /// entry is evicted first and its key returned.
    pub fn set(&self, key: impl Into<String>, value: V) -> Option<String> {
        let key = key.into();
        let mut inner = self.inner.write();
        let now = self.tick();

        if let Some(entry) = inner.map.get_mut(&key) {
            entry.value = value;
            *entry.last_access.get_mut() = now;
            return None;
        }

        let evicted = if inner.map.len() >= self.capacity {
            let victim = self.select_victim(&inner.map);
            if let Some(victim) = &victim {
                inner.map.remove(victim);
                tracing::trace!(target: "cache", key = %victim, "evicted");
            }
            victim
        } else {
            None
        };

        let inserted = inner.next_insert;
        inner.next_insert += 1;
        inner.map.insert(
            key,
            CacheEntry {
                value,
                last_access: AtomicU64::new(now),
                inserted,
            },
        );
        evicted
    }

    fn select_victim(&self, map: &HashMap<String, CacheEntry<V>>) -> Option<String> {
        match self.policy {
            EvictionPolicy::Lru => map
                .iter()
                .min_by_key(|(_, e)| (e.last_access.load(Ordering::Relaxed), e.inserted))
                .map(|(k, _)| k.clone()),
        }
    }

    /// Remove `key`; returns false if it was absent
    pub fn delete(&self, key: &str) -> bool {
        self.inner.write().map.remove(key).is_some()
    }

    /// Membership test that does not count as an access
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn clear(&self) {
        self.inner.write().map.clear();
    }

    /// Keys ordered from next-to-evict to most recently accessed
    pub fn keys_by_recency(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut keys: Vec<(u64, u64, &String)> = inner
            .map
            .iter()
            .map(|(k, e)| (e.last_access.load(Ordering::Relaxed), e.inserted, k))
            .collect();
        keys.sort_unstable();
        keys.into_iter().map(|(_, _, k)| k.clone()).collect()
    }
}

impl<V> fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("len", &self.inner.read().map.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            BoundedCache::<i32>::new(0).unwrap_err(),
            CacheError::ZeroCapacity
        );
    }

    #[test]
    fn test_set_then_get() {
        let cache = BoundedCache::new(4).unwrap();
        cache.set("k", 10);
        assert_eq!(cache.get("k"), Some(10));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = BoundedCache::new(2).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.get("a"), Some(1));

        let evicted = cache.set("c", 3);
        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_refreshes_recency_without_eviction() {
        let cache = BoundedCache::new(2).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.set("a", 11), None);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.set("c", 3).as_deref(), Some("b"));
        assert_eq!(cache.get("a"), Some(11));
    }

    #[test]
    fn test_contains_does_not_refresh() {
        let cache = BoundedCache::new(2).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);
        assert!(cache.contains("a"));
        assert_eq!(cache.set("c", 3).as_deref(), Some("a"));
    }

    #[test]
    fn test_delete() {
        let cache = BoundedCache::new(2).unwrap();
        cache.set("a", 1);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_by_recency() {
        let cache = BoundedCache::new(3).unwrap();
        cache.set("x", 1);
        cache.set("y", 2);
        cache.set("z", 3);
        cache.get("x");
        assert_eq!(cache.keys_by_recency(), vec!["y", "z", "x"]);
    }

    #[test]
    fn test_eviction_policy_parsing() {
        assert_eq!("LRU".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert_eq!("lru".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert!("fifo".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::Lru.to_string(), "LRU");
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = Arc::new(BoundedCache::new(16).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("k{}", (i * 7 + t) % 64);
                        cache.set(key.clone(), i);
                        let _ = cache.get(&key);
                        assert!(cache.len() <= 16);
                        if i % 50 == 0 {
                            cache.delete(&key);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BoundedCache<bytes::Bytes>>();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u8, u32),
        Get(u8),
        Delete(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8, any::<u32>()).prop_map(|(k, v)| Op::Set(k, v)),
            (0u8..8).prop_map(Op::Get),
            (0u8..8).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_lru_model(capacity in 1usize..5, ops in prop::collection::vec(op_strategy(), 0..64)) {
            let cache = BoundedCache::new(capacity).unwrap();
            // Oldest first
            let mut model: Vec<(String, u32)> = Vec::new();

            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        let key = k.to_string();
                        let expected_evict = if let Some(pos) = model.iter().position(|(mk, _)| *mk == key) {
                            model.remove(pos);
                            None
                        } else if model.len() == capacity {
                            Some(model.remove(0).0)
                        } else {
                            None
                        };
                        model.push((key.clone(), v));
                        prop_assert_eq!(cache.set(key, v), expected_evict);
                    }
                    Op::Get(k) => {
                        let key = k.to_string();
                        let expected = model.iter().position(|(mk, _)| *mk == key).map(|pos| {
                            let entry = model.remove(pos);
                            let v = entry.1;
                            model.push(entry);
                            v
                        });
                        prop_assert_eq!(cache.get(&key), expected);
                    }
                    Op::Delete(k) => {
                        let key = k.to_string();
                        let expected = model.iter().position(|(mk, _)| *mk == key).map(|pos| model.remove(pos)).is_some();
                        prop_assert_eq!(cache.delete(&key), expected);
                    }
                }
                prop_assert!(cache.len() <= capacity);
                prop_assert_eq!(cache.len(), model.len());
            }

            let expected_order: Vec<String> = model.into_iter().map(|(k, _)| k).collect();
            prop_assert_eq!(cache.keys_by_recency(), expected_order);
        }
    }
}
