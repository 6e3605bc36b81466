//! In-process store on `cached::SizedCache` with per-entry TTL.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cached::{Cached, SizedCache};

use crate::codec::key;
use crate::error::{KvError, KvResult};
use crate::store::traits::{
    AddAtomicity, AsyncStore, BlockingStore, Concurrency, StoreCapabilities, check_ttl,
};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Bounded in-memory store. Least recently used entries are evicted once
/// `max_size` is reached.
pub struct MemoryStore {
    store: Mutex<SizedCache<String, Entry>>,
}

impl MemoryStore {
    pub fn new(max_size: usize) -> KvResult<Self> {
        let store = SizedCache::try_with_size(max_size).map_err(|e| {
            KvError::configuration(format!("memory store max_size {}: {}", max_size, e))
        })?;
        Ok(Self {
            store: Mutex::new(store),
        })
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, SizedCache<String, Entry>>> {
        self.store
            .lock()
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    /// Live entry for `key`, dropping it first if it has expired.
    fn live<'a>(store: &'a mut SizedCache<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let expired = store
            .cache_get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()));
        if expired {
            store.cache_remove(key);
            return None;
        }
        store.cache_get_mut(key)
    }
}

impl BlockingStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            concurrency: Concurrency::Shared,
            add: AddAtomicity::CompareAndSwap,
        }
    }

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let mut store = self.lock()?;
        Ok(Self::live(&mut store, key).map(|entry| entry.value.clone()))
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        check_ttl(ttl)?;
        let mut store = self.lock()?;
        store.cache_set(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        let mut store = self.lock()?;
        if Self::live(&mut store, key).is_some() {
            return Ok(false);
        }
        store.cache_set(key.to_string(), Entry::new(value, ttl));
        Ok(true)
    }

    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        let mut store = self.lock()?;
        match Self::live(&mut store, key) {
            Some(entry) => {
                entry.value = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        let mut store = self.lock()?;
        let existed = Self::live(&mut store, key).is_some();
        store.cache_remove(key);
        Ok(existed)
    }

    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        let mut store = self.lock()?;
        match Self::live(&mut store, key) {
            Some(entry) => {
                entry.expires_at = ttl.map(|d| Instant::now() + d);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&self, namespace: &str) -> KvResult<u64> {
        let prefix = key::namespace_prefix(namespace);
        let mut store = self.lock()?;
        let doomed: Vec<String> = store
            .key_order()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        let now = Instant::now();
        let mut removed = 0u64;
        for k in &doomed {
            if store.cache_remove(k).is_some_and(|entry| !entry.is_expired(now)) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// Every call completes under a short mutex hold, so the async flavour runs
// the blocking implementation inline.
#[async_trait]
impl AsyncStore for MemoryStore {
    fn name(&self) -> &str {
        BlockingStore::name(self)
    }

    fn capabilities(&self) -> StoreCapabilities {
        BlockingStore::capabilities(self)
    }

    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        BlockingStore::get(self, key)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        BlockingStore::put(self, key, value, ttl)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        BlockingStore::put_if_absent(self, key, value, ttl)
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        BlockingStore::update(self, key, value)
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        BlockingStore::delete(self, key)
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        BlockingStore::touch(self, key, ttl)
    }

    async fn clear(&self, namespace: &str) -> KvResult<u64> {
        BlockingStore::clear(self, namespace)
    }
}
