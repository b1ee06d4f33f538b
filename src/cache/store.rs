use super::key::{CacheKey, CacheKeyStrategy};
use crate::core::{DbError, QueryDescriptor, Result, Rows};
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Rows stored for one key. Written once, shared by every reader.
pub type CacheEntry = Arc<Rows>;

type Slot = Arc<OnceCell<CacheEntry>>;

enum Entries {
    Unbounded(HashMap<CacheKey, Slot>),
    Bounded(LruCache<CacheKey, Slot>),
}

impl Entries {
    fn slot(&mut self, key: &CacheKey) -> Slot {
        match self {
            Entries::Unbounded(map) => Arc::clone(map.entry(key.clone()).or_default()),
            Entries::Bounded(lru) => {
                if let Some(slot) = lru.get(key) {
                    return Arc::clone(slot);
                }
                let slot = Slot::default();
                lru.put(key.clone(), Arc::clone(&slot));
                slot
            }
        }
    }

    fn peek(&mut self, key: &CacheKey) -> Option<Slot> {
        match self {
            Entries::Unbounded(map) => map.get(key).cloned(),
            Entries::Bounded(lru) => lru.get(key).cloned(),
        }
    }

    fn put(&mut self, key: CacheKey, slot: Slot) {
        match self {
            Entries::Unbounded(map) => {
                map.insert(key, slot);
            }
            Entries::Bounded(lru) => {
                lru.put(key, slot);
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Slot> {
        match self {
            Entries::Unbounded(map) => map.remove(key),
            Entries::Bounded(lru) => lru.pop(key),
        }
    }

    fn clear(&mut self) {
        match self {
            Entries::Unbounded(map) => map.clear(),
            Entries::Bounded(lru) => lru.clear(),
        }
    }

    fn populated(&self) -> usize {
        match self {
            Entries::Unbounded(map) => map.values().filter(|s| s.initialized()).count(),
            Entries::Bounded(lru) => lru.iter().filter(|(_, s)| s.initialized()).count(),
        }
    }
}

/// Cache counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    /// `None` when unbounded.
    pub capacity: Option<usize>,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let capacity = self
            .capacity
            .map_or_else(|| "unbounded".to_string(), |c| c.to_string());
        write!(
            f,
            "Cache Stats: {} entries (capacity {}), {} hits, {} misses",
            self.entries, capacity, self.hits, self.misses
        )
    }
}

/// Query results keyed by a digest of the query.
///
/// The default store is unbounded and never expires anything; entries live
/// as long as the store. [`CacheStore::bounded`] keeps at most `n` entries,
/// evicting the least recently used.
///
/// Concurrent misses on one key are single-flight: the first caller runs
/// the query and the others wait for its rows.
pub struct CacheStore {
    entries: Mutex<Entries>,
    strategy: CacheKeyStrategy,
    capacity: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_entries(Entries::Unbounded(HashMap::new()), None)
    }

    pub fn bounded(capacity: usize) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or_else(|| {
            DbError::ExecutionError("Cache capacity must be greater than zero".into())
        })?;
        Ok(Self::with_entries(
            Entries::Bounded(LruCache::new(cap)),
            Some(capacity),
        ))
    }

    fn with_entries(entries: Entries, capacity: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(entries),
            strategy: CacheKeyStrategy::default(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key_strategy(mut self, strategy: CacheKeyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> CacheKeyStrategy {
        self.strategy
    }

    pub fn key_for(&self, query: &QueryDescriptor) -> CacheKey {
        CacheKey::derive(query, self.strategy)
    }

    /// Return the cached rows for `query`, running `fetch` only on a miss.
    ///
    /// A failed fetch stores nothing; the next caller tries again.
    pub async fn get_or_fetch<F, Fut>(&self, query: &QueryDescriptor, fetch: F) -> Result<CacheEntry>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Rows>>,
    {
        let key = self.key_for(query);
        let slot = self.entries.lock()?.slot(&key);

        if let Some(rows) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
            return Ok(Arc::clone(rows));
        }

        let mut ran = false;
        let outcome = slot
            .get_or_try_init(|| {
                ran = true;
                async move { fetch().await.map(Arc::new) }
            })
            .await;

        match outcome {
            Ok(rows) => {
                if ran {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, rows = rows.len(), "Cache miss, stored result");
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Cache hit after waiting for another caller");
                }
                Ok(Arc::clone(rows))
            }
            Err(err) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.discard_empty(&key, &slot)?;
                Err(err)
            }
        }
    }

    pub fn get(&self, query: &QueryDescriptor) -> Result<Option<CacheEntry>> {
        let key = self.key_for(query);
        let slot = self.entries.lock()?.peek(&key);
        Ok(slot.and_then(|s| s.get().cloned()))
    }

    /// Replace the entry for `query` wholesale.
    pub fn insert(&self, query: &QueryDescriptor, rows: Rows) -> Result<()> {
        let key = self.key_for(query);
        let slot = Arc::new(OnceCell::new_with(Some(Arc::new(rows))));
        self.entries.lock()?.put(key, slot);
        Ok(())
    }

    /// Returns true when a populated entry was removed.
    pub fn invalidate(&self, query: &QueryDescriptor) -> Result<bool> {
        let key = self.key_for(query);
        let removed = self.entries.lock()?.remove(&key);
        Ok(removed.is_some_and(|slot| slot.initialized()))
    }

    pub fn clear(&self) -> Result<()> {
        self.entries.lock()?.clear();
        Ok(())
    }

    /// Number of populated entries.
    ///
    /// Counting only reads the map, so a poisoned lock is still counted.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .populated()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }

    fn discard_empty(&self, key: &CacheKey, slot: &Slot) -> Result<()> {
        let mut entries = self.entries.lock()?;
        if let Some(current) = entries.peek(key)
            && Arc::ptr_eq(&current, slot)
            && !current.initialized()
        {
            entries.remove(key);
        }
        Ok(())
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Row;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn rows(name: &str) -> Rows {
        vec![Row::from_pairs([("name", name)])]
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let store = CacheStore::new();
        let query = QueryDescriptor::new("SELECT * FROM users");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = store
                .get_or_fetch(&query, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(rows("Alice"))
                })
                .await
                .unwrap();
            assert_eq!(*result, rows("Alice"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let store = CacheStore::new();
        let query = QueryDescriptor::new("SELECT * FROM users");

        let err = store
            .get_or_fetch(&query, || async { Err(DbError::Fatal("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Fatal(_)));
        assert!(store.is_empty());

        let result = store
            .get_or_fetch(&query, || async { Ok(rows("Bob")) })
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_run_once() {
        let store = CacheStore::new();
        let query = QueryDescriptor::new("SELECT * FROM users");
        let calls = AtomicUsize::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(rows("Carol"))
        };
        let (a, b) = tokio::join!(
            store.get_or_fetch(&query, fetch),
            store.get_or_fetch(&query, fetch)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let store = Arc::new(CacheStore::new());
        store
            .insert(&QueryDescriptor::new("SELECT 1"), rows("x"))
            .unwrap();

        let poisoner = Arc::clone(&store);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the entry map");
        })
        .join();

        assert!(joined.is_err());
        assert!(store.entries.is_poisoned());
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().entries, 1);
        assert!(matches!(store.clear(), Err(DbError::LockError(_))));
    }

    #[tokio::test]
    async fn test_bounded_store_evicts_least_recent() {
        let store = CacheStore::bounded(2).unwrap();
        let q = |n: usize| QueryDescriptor::new(format!("SELECT {}", n));

        for n in 0..3 {
            store.insert(&q(n), rows("x")).unwrap();
        }

        assert_eq!(store.len(), 2);
        assert!(store.get(&q(0)).unwrap().is_none());
        assert!(store.get(&q(2)).unwrap().is_some());
        assert_eq!(store.stats().capacity, Some(2));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(CacheStore::bounded(0).is_err());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let store = CacheStore::new();
        let query = QueryDescriptor::new("SELECT 1");
        store.insert(&query, rows("a")).unwrap();

        assert!(store.invalidate(&query).unwrap());
        assert!(!store.invalidate(&query).unwrap());

        store.insert(&query, rows("b")).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
    }
}
