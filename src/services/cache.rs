//! Bounded least-recently-used caches for per-path decisions.
//!
//! Entries live in an insertion-ordered map: the front is the least recently
//! used entry and is the one evicted when the cache is full. A single mutex
//! guards each cache, so concurrent workers interleave reads and writes safely.
//! The only mutations are `get` (which refreshes recency), `set`, and `clear`.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub struct DecisionCache<V> {
    entries: Mutex<IndexMap<Utf8PathBuf, V>>,
    capacity: usize,
}

impl<V: Clone> DecisionCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<Utf8PathBuf, V>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, path: &Utf8Path) -> Option<V> {
        let mut entries = self.lock();
        let index = entries.get_index_of(path)?;
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get_index(last).map(|(_, value)| value.clone())
    }

    pub fn set(&self, path: &Utf8Path, value: V) {
        let mut entries = self.lock();
        if let Some(index) = entries.get_index_of(path) {
            let last = entries.len() - 1;
            entries.move_index(index, last);
            if let Some((_, slot)) = entries.get_index_mut(last) {
                *slot = value;
            }
            return;
        }

        if entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(path.to_path_buf(), value);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The two caches the engine keeps: path accessibility and exclusion verdicts
#[derive(Debug, Clone)]
pub struct DecisionCaches {
    pub access: Arc<DecisionCache<bool>>,
    pub exclusion: Arc<DecisionCache<bool>>,
}

impl DecisionCaches {
    pub fn new(access_capacity: usize, exclusion_capacity: usize) -> Self {
        Self {
            access: Arc::new(DecisionCache::new(access_capacity)),
            exclusion: Arc::new(DecisionCache::new(exclusion_capacity)),
        }
    }

    pub fn clear(&self) {
        self.access.clear();
        self.exclusion.clear();
        tracing::debug!("Decision caches cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> &Utf8Path {
        Utf8Path::new(s)
    }

    #[test]
    fn test_get_and_set() {
        let cache = DecisionCache::new(4);
        assert_eq!(cache.get(p("/a")), None);
        cache.set(p("/a"), true);
        assert_eq!(cache.get(p("/a")), Some(true));
        cache.set(p("/a"), false);
        assert_eq!(cache.get(p("/a")), Some(false));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = DecisionCache::new(2);
        cache.set(p("/a"), 1);
        cache.set(p("/b"), 2);

        // Touch /a so /b becomes the eviction candidate
        assert_eq!(cache.get(p("/a")), Some(1));
        cache.set(p("/c"), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(p("/b")), None);
        assert_eq!(cache.get(p("/a")), Some(1));
        assert_eq!(cache.get(p("/c")), Some(3));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let cache = DecisionCache::new(10);
        for i in 0..100 {
            cache.set(Utf8PathBuf::from(format!("/f{i}")).as_path(), i);
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.get(p("/f99")), Some(99));
        assert_eq!(cache.get(p("/f0")), None);
    }

    #[test]
    fn test_clear_both() {
        let caches = DecisionCaches::new(4, 4);
        caches.access.set(p("/a"), true);
        caches.exclusion.set(p("/a"), false);
        caches.clear();
        assert!(caches.access.is_empty());
        assert!(caches.exclusion.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(DecisionCache::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let path = Utf8PathBuf::from(format!("/t{t}/{i}"));
                        cache.set(&path, i);
                        let _ = cache.get(&path);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
