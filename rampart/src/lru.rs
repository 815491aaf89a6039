//! Bundled in-process LRU cache.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rampart_core::{Cache, CacheEntry, CacheKey, CacheResult};

const DEFAULT_CAPACITY: usize = 500;

struct Inner {
    // Front is most recently used.
    order: VecDeque<CacheKey>,
    map: HashMap<CacheKey, CacheEntry>,
}

/// In-process cache with least-recently-used eviction.
///
/// The default store of the pipeline. Entries are cloned on retrieval, so
/// callers never observe later mutations. Expiry is not enforced here; the
/// pipeline judges entry lifecycle itself, the store only bounds memory.
pub struct LruCache {
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl LruCache {
    /// Creates a cache bounded to `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        LruCache {
            max_entries,
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                map: HashMap::new(),
            }),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LruCache {
    fn default() -> Self {
        LruCache::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("max_entries", &self.max_entries)
            .field("len", &self.len())
            .finish()
    }
}

impl Inner {
    fn mark_recent(&mut self, key: &CacheKey) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            self.order.remove(position);
        }
        self.order.push_front(key.clone());
    }

    fn discard_lru(&mut self) {
        if let Some(oldest) = self.order.pop_back() {
            self.map.remove(&oldest);
        }
    }
}

#[async_trait]
impl Cache for LruCache {
    async fn retrieve(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut inner = self.lock();
        let entry = inner.map.get(key).cloned();
        if entry.is_some() {
            inner.mark_recent(key);
        }
        Ok(entry)
    }

    async fn store(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let mut inner = self.lock();
        if inner.map.insert(key.clone(), entry).is_some() {
            inner.mark_recent(key);
        } else {
            inner.order.push_front(key.clone());
            if inner.map.len() > self.max_entries {
                inner.discard_lru();
            }
        }
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        let mut inner = self.lock();
        if inner.map.remove(key).is_some()
            && let Some(position) = inner.order.iter().position(|k| k == key)
        {
            inner.order.remove(position);
        }
        Ok(())
    }
}
