//! Disk store on `cached::stores::DiskCache` (sled) with per-entry TTL.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cached::IOCached;
use cached::stores::{DiskCache as CachedDiskCache, DiskCacheError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::key;
use crate::error::{KvError, KvResult};
use crate::store::traits::{
    AddAtomicity, AsyncStore, BatchOutcome, BlockingStore, Concurrency, StoreCapabilities,
    check_ttl,
};

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    value: Vec<u8>,
    expires_at: Option<u64>, // Unix timestamp in milliseconds
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl DiskEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| now_millis().saturating_add(d.as_millis() as u64)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| now_millis() >= exp)
    }
}

fn storage_error(e: DiskCacheError) -> KvError {
    match e {
        DiskCacheError::StorageError(e) => KvError::unavailable(format!("disk store: {}", e)),
        other => KvError::Operation(other.to_string()),
    }
}

/// Settings for one disk-backed alias.
#[derive(Debug, Clone)]
pub struct DiskStoreConfig {
    pub directory: PathBuf,
    /// Name of the sled tree on disk; one per alias so aliases never share a lock.
    pub name: String,
    pub max_size: Option<u64>,
}

struct DiskInner {
    store: Mutex<CachedDiskCache<String, Vec<u8>>>,
    max_size: Option<u64>,
}

/// Persistent store. Usable from blocking callers directly and from async
/// callers through the blocking thread pool.
#[derive(Clone)]
pub struct DiskStore {
    inner: Arc<DiskInner>,
}

impl DiskStore {
    pub fn open(config: &DiskStoreConfig) -> KvResult<Self> {
        std::fs::create_dir_all(&config.directory).map_err(|e| {
            KvError::configuration(format!(
                "cannot create disk store directory {}: {}",
                config.directory.display(),
                e
            ))
        })?;
        if config.max_size == Some(0) {
            return Err(KvError::configuration("disk store max_size must be positive"));
        }
        // No lifespan on the sled layer: expiry is tracked per entry.
        let store = CachedDiskCache::new(&config.name)
            .set_disk_directory(&config.directory)
            .build()
            .map_err(|e| KvError::unavailable(format!("cannot open disk store: {}", e)))?;
        debug!(
            name = %config.name,
            directory = %config.directory.display(),
            "Disk store opened"
        );
        Ok(Self {
            inner: Arc::new(DiskInner {
                store: Mutex::new(store),
                max_size: config.max_size,
            }),
        })
    }

    /// Convenience for tests and tools.
    pub fn in_directory(directory: impl AsRef<Path>, name: &str) -> KvResult<Self> {
        Self::open(&DiskStoreConfig {
            directory: directory.as_ref().to_path_buf(),
            name: name.to_string(),
            max_size: None,
        })
    }

    async fn run<T, F>(&self, f: F) -> KvResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DiskInner) -> KvResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| KvError::Operation(format!("disk task failed: {}", e)))?
    }
}

type Guard<'a> = MutexGuard<'a, CachedDiskCache<String, Vec<u8>>>;

impl DiskInner {
    fn lock(&self) -> KvResult<Guard<'_>> {
        self.store
            .lock()
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    fn read(store: &Guard<'_>, key: &str) -> KvResult<Option<DiskEntry>> {
        let key_string = key.to_string();
        let Some(bytes) = store.cache_get(&key_string).map_err(storage_error)? else {
            return Ok(None);
        };
        let entry: DiskEntry = bincode::deserialize(&bytes)
            .map_err(|e| KvError::Deserialization(format!("corrupt disk entry: {}", e)))?;
        if entry.is_expired() {
            store.cache_remove(&key_string).map_err(storage_error)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Entry under a raw sled key, read through the same `cached` layer that
    /// wrote it. Undecodable entries come back as `None`.
    fn peek(store: &Guard<'_>, raw_key: &[u8]) -> KvResult<Option<DiskEntry>> {
        let key_string = String::from_utf8_lossy(raw_key).into_owned();
        let bytes = match store.cache_get(&key_string) {
            Ok(Some(bytes)) => bytes,
            Ok(None) | Err(DiskCacheError::CacheDeserializationError(_)) => return Ok(None),
            Err(e) => return Err(storage_error(e)),
        };
        Ok(bincode::deserialize::<DiskEntry>(&bytes).ok())
    }

    fn write(&self, store: &Guard<'_>, key: &str, entry: &DiskEntry) -> KvResult<()> {
        let bytes =
            bincode::serialize(entry).map_err(|e| KvError::Operation(e.to_string()))?;
        self.make_room(store, key)?;
        store
            .cache_set(key.to_string(), bytes)
            .map_err(storage_error)?;
        Ok(())
    }

    /// Keep the entry count under `max_size` before inserting a new key.
    /// Expired entries go first, then the lowest keys in sled order.
    /// Entries that cannot be decoded are never taken for expired.
    fn make_room(&self, store: &Guard<'_>, key: &str) -> KvResult<()> {
        let Some(max) = self.max_size else {
            return Ok(());
        };
        let db = store.connection();
        if (db.len() as u64) < max || db.contains_key(key).unwrap_or(false) {
            return Ok(());
        }

        let mut expired = Vec::new();
        for k in db.iter().keys() {
            let k = k.map_err(|e| KvError::unavailable(e.to_string()))?;
            if Self::peek(store, &k)?.is_some_and(|entry| entry.is_expired()) {
                expired.push(k);
            }
        }
        for k in expired {
            db.remove(k).map_err(|e| KvError::unavailable(e.to_string()))?;
        }

        while db.len() as u64 >= max {
            let Some(first) = db.iter().keys().next() else {
                break;
            };
            let first = first.map_err(|e| KvError::unavailable(e.to_string()))?;
            db.remove(first).map_err(|e| KvError::unavailable(e.to_string()))?;
        }
        Ok(())
    }

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let store = self.lock()?;
        Ok(Self::read(&store, key)?.map(|entry| entry.value))
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        check_ttl(ttl)?;
        let store = self.lock()?;
        self.write(&store, key, &DiskEntry::new(value, ttl))
    }

    fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        let store = self.lock()?;
        if Self::read(&store, key)?.is_some() {
            return Ok(false);
        }
        self.write(&store, key, &DiskEntry::new(value, ttl))?;
        Ok(true)
    }

    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        let store = self.lock()?;
        match Self::read(&store, key)? {
            Some(mut entry) => {
                entry.value = value;
                self.write(&store, key, &entry)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        let store = self.lock()?;
        let existed = Self::read(&store, key)?.is_some();
        store
            .cache_remove(&key.to_string())
            .map_err(storage_error)?;
        Ok(existed)
    }

    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        let store = self.lock()?;
        match Self::read(&store, key)? {
            Some(entry) => {
                self.write(&store, key, &DiskEntry::new(entry.value, ttl))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        let store = self.lock()?;
        let mut outcome = BatchOutcome::with_capacity(keys.len());
        for key in keys {
            let result = Self::read(&store, key).map(|e| e.map(|entry| entry.value));
            outcome.record(key.as_str(), result)?;
        }
        Ok(outcome)
    }

    fn clear(&self, namespace: &str) -> KvResult<u64> {
        let prefix = key::namespace_prefix(namespace);
        let store = self.lock()?;
        let db = store.connection();
        let mut removed = 0u64;
        for k in db.scan_prefix(prefix.as_bytes()).keys() {
            let k = k.map_err(|e| KvError::unavailable(e.to_string()))?;
            let live = Self::peek(&store, &k)?.is_some_and(|entry| !entry.is_expired());
            let existed = db
                .remove(k)
                .map_err(|e| KvError::unavailable(e.to_string()))?
                .is_some();
            if existed && live {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn flush(&self) -> KvResult<()> {
        let store = self.lock()?;
        store
            .connection()
            .flush()
            .map_err(|e| KvError::unavailable(e.to_string()))?;
        Ok(())
    }
}

impl BlockingStore for DiskStore {
    fn name(&self) -> &str {
        "disk"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            concurrency: Concurrency::Shared,
            add: AddAtomicity::ProcessLocal,
        }
    }

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        self.inner.put(key, value, ttl)
    }

    fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<bool> {
        self.inner.put_if_absent(key, value, ttl)
    }

    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        self.inner.update(key, value)
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        self.inner.delete(key)
    }

    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        self.inner.touch(key, ttl)
    }

    fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        self.inner.get_many(keys)
    }

    fn clear(&self, namespace: &str) -> KvResult<u64> {
        self.inner.clear(namespace)
    }

    fn flush(&self) -> KvResult<()> {
        self.inner.flush()
    }
}

#[async_trait]
impl AsyncStore for DiskStore {
    fn name(&self) -> &str {
        "disk"
    }

    fn capabilities(&self) -> StoreCapabilities {
        BlockingStore::capabilities(self)
    }

    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run(move |inner| inner.get(&key)).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        let key = key.to_string();
        self.run(move |inner| inner.put(&key, value, ttl)).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        let key = key.to_string();
        self.run(move |inner| inner.put_if_absent(&key, value, ttl))
            .await
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        let key = key.to_string();
        self.run(move |inner| inner.update(&key, value)).await
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let key = key.to_string();
        self.run(move |inner| inner.delete(&key)).await
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(AsyncStore::get(self, key).await?.is_some())
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        let key = key.to_string();
        self.run(move |inner| inner.touch(&key, ttl)).await
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        let keys = keys.to_vec();
        self.run(move |inner| inner.get_many(&keys)).await
    }

    async fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        let store = self.clone();
        self.run(move |_| BlockingStore::put_many(&store, entries, ttl))
            .await
    }

    async fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        let store = self.clone();
        let keys = keys.to_vec();
        self.run(move |_| BlockingStore::delete_many(&store, &keys))
            .await
    }

    async fn clear(&self, namespace: &str) -> KvResult<u64> {
        let namespace = namespace.to_string();
        self.run(move |inner| inner.clear(&namespace)).await
    }

    async fn flush(&self) -> KvResult<()> {
        self.run(|inner| inner.flush()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir, name: &str, max_size: Option<u64>) -> DiskStore {
        DiskStore::open(&DiskStoreConfig {
            directory: dir.path().to_path_buf(),
            name: name.to_string(),
            max_size,
        })
        .unwrap()
    }

    #[test]
    fn test_get_put_delete() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "basic", None);
        BlockingStore::put(&store, "key", b"value".to_vec(), None).unwrap();
        assert_eq!(
            BlockingStore::get(&store, "key").unwrap(),
            Some(b"value".to_vec())
        );
        assert!(BlockingStore::delete(&store, "key").unwrap());
        assert_eq!(BlockingStore::get(&store, "key").unwrap(), None);
    }

    #[test]
    fn test_ttl_expiration() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "ttl", None);
        BlockingStore::put(&store, "key", b"v".to_vec(), Some(Duration::from_millis(50))).unwrap();
        assert!(BlockingStore::exists(&store, "key").unwrap());
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(BlockingStore::get(&store, "key").unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir, "reopen", None);
            BlockingStore::put(&store, "key", b"v".to_vec(), None).unwrap();
            BlockingStore::flush(&store).unwrap();
        }
        let store = open(&dir, "reopen", None);
        assert_eq!(BlockingStore::get(&store, "key").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_update_and_touch() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "update", None);
        assert!(!BlockingStore::update(&store, "k", b"1".to_vec()).unwrap());
        BlockingStore::put(&store, "k", b"1".to_vec(), Some(Duration::from_millis(50))).unwrap();
        assert!(BlockingStore::update(&store, "k", b"2".to_vec()).unwrap());
        assert!(BlockingStore::touch(&store, "k", None).unwrap());
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(BlockingStore::get(&store, "k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_max_size_bounds_entries() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "bounded", Some(2));
        for k in ["a", "b", "c"] {
            BlockingStore::put(&store, k, k.as_bytes().to_vec(), None).unwrap();
        }
        let present = ["a", "b", "c"]
            .iter()
            .filter(|k| BlockingStore::exists(&store, k).unwrap())
            .count();
        assert_eq!(present, 2);
        assert!(BlockingStore::exists(&store, "c").unwrap());
    }

    #[test]
    fn test_eviction_keeps_live_entries_of_other_namespaces() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "shared", Some(3));
        let keep = key::encode("other_ns", "keep", 1);
        BlockingStore::put(&store, &keep, b"k".to_vec(), None).unwrap();
        for k in ["a", "b", "c"] {
            let physical = key::encode("ns", k, 1);
            BlockingStore::put(&store, &physical, k.as_bytes().to_vec(), None).unwrap();
        }

        assert!(BlockingStore::exists(&store, &keep).unwrap());
        let present: Vec<&str> = ["a", "b", "c"]
            .into_iter()
            .filter(|k| BlockingStore::exists(&store, &key::encode("ns", k, 1)).unwrap())
            .collect();
        // "ns:1:a" sorts first and is the only eviction
        assert_eq!(present, vec!["b", "c"]);
    }

    #[test]
    fn test_eviction_prefers_expired_entries() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "expiring", Some(2));
        BlockingStore::put(&store, "a", b"1".to_vec(), None).unwrap();
        BlockingStore::put(&store, "b", b"2".to_vec(), Some(Duration::from_millis(20))).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        BlockingStore::put(&store, "c", b"3".to_vec(), None).unwrap();
        assert!(BlockingStore::exists(&store, "a").unwrap());
        assert!(BlockingStore::exists(&store, "c").unwrap());
    }

    #[test]
    fn test_clear_counts_live_entries_only() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "clear_live", None);
        let gone = key::encode("ns", "gone", 1);
        let kept = key::encode("ns", "kept", 1);
        BlockingStore::put(&store, &gone, b"1".to_vec(), Some(Duration::from_millis(20))).unwrap();
        BlockingStore::put(&store, &kept, b"2".to_vec(), None).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(BlockingStore::clear(&store, "ns").unwrap(), 1);
        assert_eq!(BlockingStore::clear(&store, "ns").unwrap(), 0);
    }

    #[test]
    fn test_clear_namespace() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "clear", None);
        let a = key::encode("ns", "a", 1);
        let b = key::encode("other", "b", 1);
        BlockingStore::put(&store, &a, b"1".to_vec(), None).unwrap();
        BlockingStore::put(&store, &b, b"2".to_vec(), None).unwrap();
        assert_eq!(BlockingStore::clear(&store, "ns").unwrap(), 1);
        assert!(!BlockingStore::exists(&store, &a).unwrap());
        assert!(BlockingStore::exists(&store, &b).unwrap());
    }

    #[tokio::test]
    async fn test_async_flavour() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "async", None);
        assert!(
            AsyncStore::put_if_absent(&store, "k", b"v".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            !AsyncStore::put_if_absent(&store, "k", b"w".to_vec(), None)
                .await
                .unwrap()
        );
        let outcome = AsyncStore::delete_many(&store, &["k".to_string(), "x".to_string()])
            .await
            .unwrap();
        assert!(matches!(outcome.get("k"), Some(Ok(true))));
        assert!(matches!(outcome.get("x"), Some(Ok(false))));
    }
}
