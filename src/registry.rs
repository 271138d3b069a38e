//! One-to-one mapping between user ids and signaling sessions
//!
//! Both directions live under a single lock so a `put` that evicts an old
//! pairing is observed atomically by every other session handler.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

/// Pairings displaced by a [`BiMap::put`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted<K, V> {
    /// The value previously bound to the inserted key
    pub previous_value: Option<V>,
    /// The key previously bound to the inserted value
    pub previous_key: Option<K>,
}

struct Inner<K, V> {
    forward: HashMap<K, V>,
    reverse: HashMap<V, K>,
}

/// Bidirectional map with replace-on-conflict semantics
///
/// Invariant: every key maps to at most one value and every value to at most
/// one key; `forward` and `reverse` are always exact mirrors.
pub struct BiMap<K, V> {
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> BiMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    /// Create an empty map
    pub fn new() -> Self {
        BiMap {
            inner: RwLock::new(Inner {
                forward: HashMap::new(),
                reverse: HashMap::new(),
            }),
        }
    }

    /// Bind `key` to `value`, evicting any pairing that shares either half
    pub fn put(&self, key: K, value: V) -> Evicted<K, V> {
        let mut inner = self.inner.write();

        let previous_value = inner.forward.remove(&key);
        if let Some(old) = &previous_value {
            inner.reverse.remove(old);
        }
        let previous_key = inner.reverse.remove(&value);
        if let Some(old) = &previous_key {
            inner.forward.remove(old);
        }

        inner.forward.insert(key.clone(), value.clone());
        inner.reverse.insert(value, key);

        Evicted {
            previous_value: previous_value.filter(|v| !inner.reverse.contains_key(v)),
            previous_key: previous_key.filter(|k| !inner.forward.contains_key(k)),
        }
    }

    /// The value bound to `key`
    pub fn value_for(&self, key: &K) -> Option<V> {
        self.inner.read().forward.get(key).cloned()
    }

    /// The key bound to `value`
    pub fn key_for(&self, value: &V) -> Option<K> {
        self.inner.read().reverse.get(value).cloned()
    }

    /// Remove the pairing for `key`, returning its value
    pub fn remove_by_key(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write();
        let value = inner.forward.remove(key)?;
        inner.reverse.remove(&value);
        Some(value)
    }

    /// Remove the pairing for `value`, returning its key
    pub fn remove_by_value(&self, value: &V) -> Option<K> {
        let mut inner = self.inner.write();
        let key = inner.reverse.remove(value)?;
        inner.forward.remove(&key);
        Some(key)
    }

    /// Whether `key` is bound
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().forward.contains_key(key)
    }

    /// Whether `value` is bound
    pub fn contains_value(&self, value: &V) -> bool {
        self.inner.read().reverse.contains_key(value)
    }

    /// Number of pairings
    pub fn len(&self) -> usize {
        self.inner.read().forward.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for BiMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_and_lookup_both_ways() {
        let map = BiMap::new();
        map.put("alice".to_string(), 1u64);

        assert_eq!(map.value_for(&"alice".to_string()), Some(1));
        assert_eq!(map.key_for(&1), Some("alice".to_string()));
    }

    #[test]
    fn test_rebinding_key_evicts_old_value() {
        let map = BiMap::new();
        map.put("alice".to_string(), 1u64);
        let evicted = map.put("alice".to_string(), 2u64);

        assert_eq!(evicted.previous_value, Some(1));
        assert_eq!(map.value_for(&"alice".to_string()), Some(2));
        assert_eq!(map.key_for(&1), None);
        assert!(!map.contains_value(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_rebinding_value_evicts_old_key() {
        let map = BiMap::new();
        map.put("alice".to_string(), 1u64);
        let evicted = map.put("mallory".to_string(), 1u64);

        assert_eq!(evicted.previous_key, Some("alice".to_string()));
        assert_eq!(map.key_for(&1), Some("mallory".to_string()));
        assert!(!map.contains_key(&"alice".to_string()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_put_evicting_both_halves() {
        let map = BiMap::new();
        map.put("a".to_string(), 1u64);
        map.put("b".to_string(), 2u64);

        let evicted = map.put("a".to_string(), 2u64);
        assert_eq!(evicted.previous_value, Some(1));
        assert_eq!(evicted.previous_key, Some("b".to_string()));

        assert_eq!(map.len(), 1);
        assert_eq!(map.key_for(&1), None);
        assert_eq!(map.value_for(&"b".to_string()), None);
    }

    #[test]
    fn test_same_pair_again_evicts_nothing() {
        let map = BiMap::new();
        map.put("a".to_string(), 1u64);
        let evicted = map.put("a".to_string(), 1u64);

        assert_eq!(evicted.previous_value, None);
        assert_eq!(evicted.previous_key, None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_by_key_clears_both_directions() {
        let map = BiMap::new();
        map.put("alice".to_string(), 1u64);

        assert_eq!(map.remove_by_key(&"alice".to_string()), Some(1));
        assert_eq!(map.value_for(&"alice".to_string()), None);
        assert_eq!(map.key_for(&1), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_remove_by_value_clears_both_directions() {
        let map = BiMap::new();
        map.put("alice".to_string(), 1u64);

        assert_eq!(map.remove_by_value(&1), Some("alice".to_string()));
        assert!(!map.contains_key(&"alice".to_string()));
        assert_eq!(map.remove_by_value(&1), None);
    }

    #[test]
    fn test_concurrent_puts_keep_bijection() {
        let map = Arc::new(BiMap::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        map.put(format!("user{}", i % 10), (t * 7 + i) % 13);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let inner = map.inner.read();
        assert_eq!(inner.forward.len(), inner.reverse.len());
        for (k, v) in &inner.forward {
            assert_eq!(inner.reverse.get(v), Some(k));
        }
    }
}
