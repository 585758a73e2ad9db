//! Write-through cache over a persistent store
//!
//! Reads are answered from memory once a key has been resolved, including
//! keys confirmed absent. A `set` is committed to memory as soon as the
//! ordered write queue accepts it; a `delete` only once the store confirms.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use larder_storage::{
    BatchResult, KeyValueStore, PersistentStore, RecordKey, RecordValue, StorageError,
    StorageLocation,
};

use crate::entry::CacheEntry;
use crate::writer::{PendingWrite, WriteQueue};
use crate::Result;

struct Resident<V> {
    entry: CacheEntry<V>,
    /// Stamp of the last direct write to the key; read back-fills keep it.
    stamp: u64,
}

pub struct CachedStore<K, V, S = PersistentStore<K, V>> {
    /// Backing store
    store: Arc<S>,
    /// Resolved keys; never evicted
    entries: Arc<RwLock<HashMap<K, Resident<V>>>>,
    /// Write-behind queue to the backing store
    writes: Arc<WriteQueue<K, V>>,
    /// Last stamp handed to a direct write
    stamps: Arc<AtomicU64>,
}

impl<K: RecordKey, V: RecordValue> CachedStore<K, V> {
    /// Cache over the persistent store `name`. Nothing is opened until the
    /// first operation that needs the store.
    pub fn open(name: impl Into<String>, location: StorageLocation) -> Self {
        Self::with_store(PersistentStore::new(name, location))
    }
}

impl<K, V, S> CachedStore<K, V, S>
where
    K: RecordKey,
    V: RecordValue,
    S: KeyValueStore<K, V>,
{
    pub fn with_store(store: S) -> Self {
        Self::with_queue(store, WriteQueue::new())
    }

    fn with_queue(store: S, writes: WriteQueue<K, V>) -> Self {
        Self {
            store: Arc::new(store),
            entries: Arc::new(RwLock::new(HashMap::new())),
            writes: Arc::new(writes),
            stamps: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The cached state of `key`, without touching the store.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries
            .read()
            .get(key)
            .map(|resident| resident.entry.clone())
    }

    pub fn resident_len(&self) -> usize {
        self.entries.read().len()
    }

    /// Queues the persistent write and commits `value` to memory without
    /// waiting for the store.
    ///
    /// A failed persistent write is not reported here; the returned handle
    /// can be awaited to observe it. When the write cannot be queued (no
    /// Tokio runtime, queue full) the error is returned and memory is left
    /// untouched.
    pub fn set(&self, key: K, value: V) -> Result<PendingWrite> {
        self.ensure_live()?;

        // Queue order and stamp order agree while the entries lock is held
        let mut entries = self.entries.write();
        let pending = self.writes.set(&self.store, key.clone(), value.clone())?;
        let stamp = self.next_stamp();
        entries.insert(
            key,
            Resident {
                entry: CacheEntry::Value(value),
                stamp,
            },
        );

        Ok(pending)
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_live()?;

        let cached = self.peek(key);
        if let Some(entry) = cached {
            tracing::trace!(store = %self.name(), key = ?key, "Cache hit");
            return Ok(entry.into_value());
        }

        // Concurrent misses for one key each query the store; the last to
        // resolve wins
        let value = self.store.get(key).await?;
        back_fill(
            &mut self.entries.write(),
            key.clone(),
            CacheEntry::from(value.clone()),
        );

        Ok(value)
    }

    /// Answers from memory only when every key is resident. Otherwise the
    /// whole key set is fetched in one call and every result is written
    /// back, replacing entries that were already resident.
    pub async fn get_batch(&self, keys: &[K]) -> Result<BatchResult<K, V>> {
        self.ensure_live()?;

        let resident: Option<BatchResult<K, V>> = {
            let entries = self.entries.read();
            keys.iter()
                .map(|key| {
                    entries
                        .get(key)
                        .map(|resident| (key.clone(), resident.entry.clone().into_value()))
                })
                .collect()
        };
        if let Some(batch) = resident {
            tracing::trace!(store = %self.name(), keys = keys.len(), "Batch cache hit");
            return Ok(batch);
        }

        tracing::debug!(
            store = %self.name(),
            keys = keys.len(),
            "Batch cache miss, fetching full key set"
        );

        let fetched = self.store.get_batch(keys).await?;
        let batch: BatchResult<K, V> = keys
            .iter()
            .map(|key| (key.clone(), fetched.get(key).flatten().cloned()))
            .collect();
        {
            let mut entries = self.entries.write();
            for (key, value) in batch.iter() {
                back_fill(&mut entries, key.clone(), CacheEntry::from(value.cloned()));
            }
        }

        Ok(batch)
    }

    /// Waits for the persistent delete, then marks `key` confirmed absent.
    /// Ordered after every write queued before it. On failure the cached
    /// entry is left as it was, and a `set` queued while the delete was in
    /// flight keeps its value.
    pub async fn delete(&self, key: &K) -> Result<()> {
        self.ensure_live()?;

        let (pending, ticket) = {
            let _entries = self.entries.write();
            let pending = self.writes.delete(&self.store, key.clone())?;
            (pending, self.next_stamp())
        };
        pending.durable().await?;

        if self.store.is_destroyed() {
            return Ok(());
        }
        let mut entries = self.entries.write();
        let superseded = entries.get(key).is_some_and(|resident| resident.stamp > ticket);
        if !superseded {
            entries.insert(
                key.clone(),
                Resident {
                    entry: CacheEntry::ConfirmedAbsent,
                    stamp: ticket,
                },
            );
        }
        Ok(())
    }

    /// Destroys the backing store and drops every cached entry. All later
    /// operations fail with [`StorageError::Terminal`].
    pub async fn destroy(&self) -> Result<()> {
        let result = self.store.destroy().await;
        if self.store.is_destroyed() {
            self.entries.write().clear();
        }
        result
    }

    fn next_stamp(&self) -> u64 {
        self.stamps.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_live(&self) -> Result<()> {
        if self.store.is_destroyed() {
            return Err(StorageError::Terminal {
                name: self.name().to_string(),
            });
        }
        Ok(())
    }
}

impl<K, V, S> Clone for CachedStore<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            entries: Arc::clone(&self.entries),
            writes: Arc::clone(&self.writes),
            stamps: Arc::clone(&self.stamps),
        }
    }
}

/// Records a value read from the store without disturbing the stamp of the
/// last direct write.
fn back_fill<K: RecordKey, V>(
    entries: &mut HashMap<K, Resident<V>>,
    key: K,
    entry: CacheEntry<V>,
) {
    let stamp = entries.get(&key).map_or(0, |resident| resident.stamp);
    entries.insert(key, Resident { entry, stamp });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory backend that records how it is called.
    #[derive(Default)]
    struct RecordingStore {
        records: Mutex<HashMap<String, i32>>,
        gets: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
        sets: AtomicUsize,
        fail_writes: AtomicBool,
        fail_deletes: AtomicBool,
        /// Answer batches in reverse request order
        reverse_batches: AtomicBool,
        destroyed: AtomicBool,
    }

    impl RecordingStore {
        fn with_records(records: &[(&str, i32)]) -> Self {
            let store = Self::default();
            for (key, value) in records {
                store.records.lock().insert(key.to_string(), *value);
            }
            store
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl KeyValueStore<String, i32> for RecordingStore {
        fn name(&self) -> &str {
            "recording"
        }

        fn is_destroyed(&self) -> bool {
            self.destroyed.load(Ordering::SeqCst)
        }

        async fn get(&self, key: &String) -> Result<Option<i32>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.records.lock().get(key).copied())
        }

        async fn get_batch(&self, keys: &[String]) -> Result<BatchResult<String, i32>> {
            self.batches.lock().push(keys.to_vec());
            let records = self.records.lock();
            let row = |key: &String| (key.clone(), records.get(key).copied());
            if self.reverse_batches.load(Ordering::SeqCst) {
                Ok(keys.iter().rev().map(row).collect())
            } else {
                Ok(keys.iter().map(row).collect())
            }
        }

        async fn set(&self, key: &String, value: &i32) -> Result<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Transaction("disk full".to_string()));
            }
            self.records.lock().insert(key.clone(), *value);
            Ok(())
        }

        async fn delete(&self, key: &String) -> Result<()> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(StorageError::Transaction("disk full".to_string()));
            }
            self.records.lock().remove(key);
            Ok(())
        }

        async fn destroy(&self) -> Result<()> {
            self.destroyed.store(true, Ordering::SeqCst);
            self.records.lock().clear();
            Ok(())
        }
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn test_set_is_visible_before_persisting() {
        let cache = CachedStore::with_store(RecordingStore::default());

        let pending = cache.set(key("k"), 5).unwrap();
        assert_eq!(cache.get(&key("k")).await.unwrap(), Some(5));
        assert_eq!(cache.store().gets(), 0);

        pending.durable().await.unwrap();
        assert_eq!(cache.store().records.lock().get("k"), Some(&5));
    }

    #[tokio::test]
    async fn test_absence_is_cached() {
        let cache = CachedStore::with_store(RecordingStore::default());

        assert_eq!(cache.get(&key("missing")).await.unwrap(), None);
        assert_eq!(cache.peek(&key("missing")), Some(CacheEntry::ConfirmedAbsent));
        assert_eq!(cache.get(&key("missing")).await.unwrap(), None);
        assert_eq!(cache.store().gets(), 1);
    }

    #[tokio::test]
    async fn test_read_through_fills_cache_once() {
        let cache = CachedStore::with_store(RecordingStore::with_records(&[("a", 1)]));

        assert_eq!(cache.peek(&key("a")), None);
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some(1));
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some(1));
        assert_eq!(cache.store().gets(), 1);
        assert_eq!(cache.resident_len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_are_not_coalesced() {
        let cache = CachedStore::with_store(RecordingStore::with_records(&[("a", 1)]));

        let a = key("a");
        let (first, second) = tokio::join!(cache.get(&a), cache.get(&a));
        assert_eq!(first.unwrap(), Some(1));
        assert_eq!(second.unwrap(), Some(1));
        assert_eq!(cache.store().gets(), 2);
    }

    #[tokio::test]
    async fn test_batch_fully_resident_skips_store() {
        let cache = CachedStore::with_store(RecordingStore::default());
        cache.set(key("b"), 2).unwrap();
        cache.set(key("a"), 1).unwrap();
        cache.get(&key("c")).await.unwrap();

        let batch = cache
            .get_batch(&[key("a"), key("c"), key("b")])
            .await
            .unwrap();

        let pairs: Vec<_> = batch.into_iter().collect();
        assert_eq!(
            pairs,
            vec![(key("a"), Some(1)), (key("c"), None), (key("b"), Some(2))]
        );
        assert!(cache.store().batches().is_empty());
    }

    #[tokio::test]
    async fn test_partial_hit_fetches_whole_batch() {
        let cache =
            CachedStore::with_store(RecordingStore::with_records(&[("k1", 1), ("k2", 2)]));
        cache.get(&key("k1")).await.unwrap();

        let batch = cache.get_batch(&[key("k1"), key("k2")]).await.unwrap();
        assert_eq!(batch.get(&key("k2")), Some(Some(&2)));
        assert_eq!(cache.store().batches(), vec![vec![key("k1"), key("k2")]]);

        // Everything is resident now
        cache.get_batch(&[key("k2"), key("k1")]).await.unwrap();
        assert_eq!(cache.store().batches().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_backfill_replaces_resident_entries() {
        let cache = CachedStore::with_store(RecordingStore::with_records(&[("k1", 1)]));
        cache.get(&key("k1")).await.unwrap();

        // Store changes underneath the cache
        cache.store().records.lock().insert(key("k1"), 10);

        let batch = cache.get_batch(&[key("k1"), key("k2")]).await.unwrap();
        assert_eq!(batch.get(&key("k1")), Some(Some(&10)));
        assert_eq!(cache.peek(&key("k1")), Some(CacheEntry::Value(10)));
        assert_eq!(cache.peek(&key("k2")), Some(CacheEntry::ConfirmedAbsent));
    }

    #[tokio::test]
    async fn test_batch_keeps_request_order_when_store_reorders_rows() {
        let store = RecordingStore::with_records(&[("k1", 1), ("k3", 3)]);
        store.reverse_batches.store(true, Ordering::SeqCst);
        let cache = CachedStore::with_store(store);

        let keys = [key("k1"), key("k2"), key("k3"), key("k4")];
        let batch = cache.get_batch(&keys).await.unwrap();

        let pairs: Vec<_> = batch.into_iter().collect();
        assert_eq!(
            pairs,
            vec![
                (key("k1"), Some(1)),
                (key("k2"), None),
                (key("k3"), Some(3)),
                (key("k4"), None),
            ]
        );
        assert_eq!(cache.peek(&key("k1")), Some(CacheEntry::Value(1)));
        assert_eq!(cache.peek(&key("k4")), Some(CacheEntry::ConfirmedAbsent));

        // Served from memory, still in request order
        let again = cache.get_batch(&keys).await.unwrap();
        assert_eq!(again.keys().cloned().collect::<Vec<_>>(), keys.to_vec());
        assert_eq!(cache.store().batches().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_reported_by_set() {
        let store = RecordingStore::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        let cache = CachedStore::with_store(store);

        let pending = cache.set(key("k"), 7).unwrap();
        assert_eq!(cache.get(&key("k")).await.unwrap(), Some(7));

        let err = pending.durable().await.unwrap_err();
        assert!(matches!(err, StorageError::Transaction(_)));
        // Memory stays ahead of the store
        assert_eq!(cache.get(&key("k")).await.unwrap(), Some(7));
        assert!(cache.store().records.lock().get("k").is_none());
    }

    #[tokio::test]
    async fn test_writes_land_in_order() {
        let cache = CachedStore::with_store(RecordingStore::default());

        for value in 0..50 {
            cache.set(key("k"), value).unwrap();
        }
        cache.delete(&key("other")).await.unwrap();

        assert_eq!(cache.store().records.lock().get("k"), Some(&49));
        assert_eq!(cache.store().sets.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_delete_then_set() {
        let cache = CachedStore::with_store(RecordingStore::with_records(&[("k", 1)]));

        cache.delete(&key("k")).await.unwrap();
        assert_eq!(cache.get(&key("k")).await.unwrap(), None);
        assert_eq!(cache.store().gets(), 0);

        cache.set(key("k"), 2).unwrap().durable().await.unwrap();
        assert_eq!(cache.get(&key("k")).await.unwrap(), Some(2));
        assert_eq!(cache.store().records.lock().get("k"), Some(&2));
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_cache_untouched() {
        let store = RecordingStore::with_records(&[("k", 1)]);
        store.fail_deletes.store(true, Ordering::SeqCst);
        let cache = CachedStore::with_store(store);
        cache.get(&key("k")).await.unwrap();

        let err = cache.delete(&key("k")).await.unwrap_err();
        assert!(matches!(err, StorageError::Transaction(_)));
        assert_eq!(cache.peek(&key("k")), Some(CacheEntry::Value(1)));
        assert_eq!(cache.store().records.lock().get("k"), Some(&1));
    }

    #[tokio::test]
    async fn test_set_during_delete_keeps_its_value() {
        let cache = CachedStore::with_store(RecordingStore::with_records(&[("k", 1)]));

        let k = key("k");
        let (deleted, pending) = tokio::join!(cache.delete(&k), async {
            tokio::task::yield_now().await;
            cache.set(key("k"), 2).unwrap()
        });
        deleted.unwrap();
        pending.durable().await.unwrap();

        assert_eq!(cache.peek(&key("k")), Some(CacheEntry::Value(2)));
        assert_eq!(cache.store().records.lock().get("k"), Some(&2));
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        let cache = CachedStore::with_store(RecordingStore::default());

        cache.delete(&key("never")).await.unwrap();
        assert_eq!(cache.get(&key("never")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_destroy_rejects_even_resident_keys() {
        let cache = CachedStore::with_store(RecordingStore::default());
        cache.set(key("k"), 1).unwrap();

        cache.destroy().await.unwrap();

        assert_eq!(cache.resident_len(), 0);
        assert!(cache.get(&key("k")).await.unwrap_err().is_terminal());
        assert!(cache.get_batch(&[key("k")]).await.unwrap_err().is_terminal());
        assert!(cache.set(key("k"), 2).unwrap_err().is_terminal());
        assert!(cache.delete(&key("k")).await.unwrap_err().is_terminal());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_set_without_caching() {
        let cache =
            CachedStore::with_queue(RecordingStore::default(), WriteQueue::with_capacity(1));

        // The worker cannot run before the next await
        let first = cache.set(key("a"), 1).unwrap();
        let err = cache.set(key("b"), 2).unwrap_err();
        assert!(matches!(err, StorageError::Request(_)));
        assert_eq!(cache.peek(&key("b")), None);

        first.durable().await.unwrap();
        cache.set(key("b"), 2).unwrap().durable().await.unwrap();
        assert_eq!(cache.store().records.lock().get("b"), Some(&2));
    }

    #[test]
    fn test_writes_resume_on_a_new_runtime() {
        let runtime = || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
        };
        let cache = CachedStore::with_store(RecordingStore::default());

        let first = runtime();
        first.block_on(async { cache.set(key("k"), 1).unwrap().durable().await.unwrap() });
        drop(first);

        let second = runtime();
        second.block_on(async {
            let pending = cache.set(key("k"), 2).unwrap();
            assert_eq!(cache.peek(&key("k")), Some(CacheEntry::Value(2)));
            pending.durable().await.unwrap();
        });

        assert_eq!(cache.store().records.lock().get("k"), Some(&2));
    }

    #[test]
    fn test_set_outside_runtime_fails_cleanly() {
        let cache = CachedStore::with_store(RecordingStore::default());

        assert!(cache.set(key("k"), 1).is_err());
        assert_eq!(cache.peek(&key("k")), None);
    }
}
