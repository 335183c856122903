// Bounded caches shared by every request

use std::num::NonZeroUsize;

use parking_lot::Mutex;

/// Key/value store used for parsed queries and persisted queries
pub trait Cache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn add(&self, key: &str, value: V);
}

/// Least-recently-used cache with a fixed capacity
///
/// Lookups update recency, so both `get` and `add` take the lock.
pub struct Lru<V> {
    inner: Mutex<lru::LruCache<String, V>>,
}

impl<V> Lru<V> {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

impl<V: Clone + Send> Cache<V> for Lru<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    fn add(&self, key: &str, value: V) {
        self.inner.lock().put(key.to_string(), value);
    }
}

impl<V> std::fmt::Debug for Lru<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Lru")
            .field("len", &inner.len())
            .field("capacity", &inner.cap())
            .finish()
    }
}
