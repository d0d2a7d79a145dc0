use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A `DashMap` capped at `cap` keys, evicting the oldest-inserted key once
/// the cap is exceeded (§4.1 "LRU eviction" — actually FIFO by insertion
/// order, not access order).
pub struct BoundedCache<V> {
    map: DashMap<String, V>,
    order: Mutex<VecDeque<String>>,
    cap: usize,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(cap: usize) -> Self {
        Self {
            map: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.map.get(key).map(|r| r.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let removed = self.map.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            let mut order = self.order.lock().unwrap();
            order.retain(|k| k != key);
        }
        removed
    }

    /// Runs `f` against the entry for `key`, inserting `default()` first if
    /// absent. Tracks insertion order and evicts the oldest key if this
    /// insert pushed the cache over `cap`.
    pub fn with_entry<R>(
        &self,
        key: &str,
        default: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let is_new;
        let mut guard = match self.map.entry(key.to_string()) {
            Entry::Occupied(e) => {
                is_new = false;
                e.into_ref()
            }
            Entry::Vacant(e) => {
                is_new = true;
                e.insert(default())
            }
        };
        let result = f(&mut guard);
        drop(guard);
        if is_new {
            self.track_new(key);
        }
        result
    }

    fn track_new(&self, key: &str) {
        let mut order = self.order.lock().unwrap();
        order.push_back(key.to_string());
        while order.len() > self.cap {
            if let Some(evicted) = order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_key_past_cap() {
        let cache: BoundedCache<i32> = BoundedCache::new(2);
        cache.with_entry("a", || 1, |_| ());
        cache.with_entry("b", || 2, |_| ());
        cache.with_entry("c", || 3, |_| ());
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn touching_existing_key_does_not_evict() {
        let cache: BoundedCache<i32> = BoundedCache::new(2);
        cache.with_entry("a", || 1, |v| *v += 1);
        cache.with_entry("b", || 2, |_| ());
        cache.with_entry("a", || 99, |v| *v += 1);
        assert_eq!(cache.get("a"), Some(3));
        assert_eq!(cache.get("b"), Some(2));
    }
}
