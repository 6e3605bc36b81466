//! Shared fixtures: one driver over both cache families so every behaviour
//! scenario runs against blocking and async front ends alike.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kvcache::store::{AsyncStore, BlockingStore, DiskStore, MemoryStore, StoreCapabilities};
use kvcache::wrappers::Wrapper;
use kvcache::{AsyncCache, Cache, CacheBuilder, Expiry, KvError, KvResult};
use serde_json::Value;
use tempfile::TempDir;

pub const NAMESPACE: &str = "suite";

pub enum Driver {
    Blocking(Cache),
    Async(AsyncCache),
}

impl Driver {
    pub fn family(&self) -> &'static str {
        match self {
            Driver::Blocking(_) => "blocking",
            Driver::Async(_) => "async",
        }
    }

    pub async fn set(&self, key: &str, value: &Value, expiry: Expiry) -> KvResult<()> {
        match self {
            Driver::Blocking(c) => c.set(key, value, expiry),
            Driver::Async(c) => c.set(key, value, expiry).await,
        }
    }

    pub async fn set_versioned(&self, key: &str, version: u32, value: &Value) -> KvResult<()> {
        match self {
            Driver::Blocking(c) => c.set((key, version), value, Expiry::Default),
            Driver::Async(c) => c.set((key, version), value, Expiry::Default).await,
        }
    }

    pub async fn get(&self, key: &str) -> KvResult<Option<Value>> {
        match self {
            Driver::Blocking(c) => c.get(key),
            Driver::Async(c) => c.get(key).await,
        }
    }

    pub async fn get_versioned(&self, key: &str, version: u32) -> KvResult<Option<Value>> {
        match self {
            Driver::Blocking(c) => c.get((key, version)),
            Driver::Async(c) => c.get((key, version)).await,
        }
    }

    pub async fn add(&self, key: &str, value: &Value) -> KvResult<bool> {
        match self {
            Driver::Blocking(c) => c.add(key, value, Expiry::Default),
            Driver::Async(c) => c.add(key, value, Expiry::Default).await,
        }
    }

    pub async fn delete(&self, key: &str) -> KvResult<bool> {
        match self {
            Driver::Blocking(c) => c.delete(key),
            Driver::Async(c) => c.delete(key).await,
        }
    }

    pub async fn has_key(&self, key: &str) -> KvResult<bool> {
        match self {
            Driver::Blocking(c) => c.has_key(key),
            Driver::Async(c) => c.has_key(key).await,
        }
    }

    pub async fn touch(&self, key: &str, expiry: Expiry) -> KvResult<bool> {
        match self {
            Driver::Blocking(c) => c.touch(key, expiry),
            Driver::Async(c) => c.touch(key, expiry).await,
        }
    }

    pub async fn incr(&self, key: &str, delta: i64) -> KvResult<i64> {
        match self {
            Driver::Blocking(c) => c.incr(key, delta),
            Driver::Async(c) => c.incr(key, delta).await,
        }
    }

    pub async fn get_many(&self, keys: &[&str]) -> KvResult<HashMap<String, Value>> {
        match self {
            Driver::Blocking(c) => c.get_many(keys, None),
            Driver::Async(c) => c.get_many(keys, None).await,
        }
    }

    pub async fn set_many(&self, entries: Vec<(&str, Value)>) -> KvResult<Vec<String>> {
        match self {
            Driver::Blocking(c) => c.set_many(entries, Expiry::Default, None),
            Driver::Async(c) => c.set_many(entries, Expiry::Default, None).await,
        }
    }

    pub async fn clear(&self) -> KvResult<u64> {
        match self {
            Driver::Blocking(c) => c.clear(),
            Driver::Async(c) => c.clear().await,
        }
    }
}

/// One driver per family, each over its own memory store.
pub fn memory_drivers(builder: impl Fn() -> CacheBuilder) -> Vec<Driver> {
    vec![
        Driver::Blocking(
            builder()
                .build(Box::new(MemoryStore::new(1_000).expect("memory store")))
                .expect("blocking cache"),
        ),
        Driver::Async(
            builder()
                .build_async(Box::new(MemoryStore::new(1_000).expect("memory store")))
                .expect("async cache"),
        ),
    ]
}

/// One driver per family, each over its own disk store in `dir`.
pub fn disk_drivers(dir: &TempDir, builder: impl Fn() -> CacheBuilder) -> Vec<Driver> {
    let blocking = DiskStore::in_directory(dir.path(), "blocking").expect("disk store");
    let asynchronous = DiskStore::in_directory(dir.path(), "async").expect("disk store");
    vec![
        Driver::Blocking(builder().build(Box::new(blocking)).expect("blocking cache")),
        Driver::Async(
            builder()
                .build_async(Box::new(asynchronous))
                .expect("async cache"),
        ),
    ]
}

/// Both families over one shared memory store, which is returned for raw access.
pub fn shared_memory_drivers(builder: impl Fn() -> CacheBuilder) -> (Arc<MemoryStore>, Vec<Driver>) {
    let store = Arc::new(MemoryStore::new(1_000).expect("memory store"));
    let blocking: Box<dyn BlockingStore> = Box::new(Arc::clone(&store));
    let asynchronous: Box<dyn AsyncStore> = Box::new(Arc::clone(&store));
    let drivers = vec![
        Driver::Blocking(builder().build(blocking).expect("blocking cache")),
        Driver::Async(builder().build_async(asynchronous).expect("async cache")),
    ];
    (store, drivers)
}

pub fn plain() -> CacheBuilder {
    CacheBuilder::new(NAMESPACE)
}

/// Wrapper that refuses to write any payload containing `poison`.
pub struct RejectPoison;

impl Wrapper for RejectPoison {
    fn name(&self) -> &str {
        "reject-poison"
    }

    fn on_write(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        if bytes.windows(6).any(|w| w == b"poison") {
            return Err(KvError::wrapper("reject-poison", "payload refused"));
        }
        Ok(bytes)
    }

    fn on_read(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        Ok(bytes)
    }
}

/// Memory store whose writes to any key containing `unreachable` fail as if
/// the server had gone away.
pub struct PartiallyReachable {
    inner: MemoryStore,
}

impl PartiallyReachable {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(1_000).expect("memory store"),
        }
    }

    fn check(key: &str) -> KvResult<()> {
        if key.contains("unreachable") {
            return Err(KvError::unavailable("connection refused"));
        }
        Ok(())
    }
}

impl BlockingStore for PartiallyReachable {
    fn name(&self) -> &str {
        "partial"
    }

    fn capabilities(&self) -> StoreCapabilities {
        BlockingStore::capabilities(&self.inner)
    }

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        BlockingStore::get(&self.inner, key)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        Self::check(key)?;
        BlockingStore::put(&self.inner, key, value, ttl)
    }

    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        Self::check(key)?;
        BlockingStore::update(&self.inner, key, value)
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        BlockingStore::delete(&self.inner, key)
    }

    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        BlockingStore::touch(&self.inner, key, ttl)
    }

    fn clear(&self, namespace: &str) -> KvResult<u64> {
        BlockingStore::clear(&self.inner, namespace)
    }
}

#[async_trait]
impl AsyncStore for PartiallyReachable {
    fn name(&self) -> &str {
        "partial"
    }

    fn capabilities(&self) -> StoreCapabilities {
        BlockingStore::capabilities(&self.inner)
    }

    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        BlockingStore::get(self, key)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        BlockingStore::put(self, key, value, ttl)
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

/// One driver per family over a [`PartiallyReachable`] store.
pub fn partially_reachable_drivers(builder: impl Fn() -> CacheBuilder) -> Vec<Driver> {
    vec![
        Driver::Blocking(
            builder()
                .build(Box::new(PartiallyReachable::new()))
                .expect("blocking cache"),
        ),
        Driver::Async(
            builder()
                .build_async(Box::new(PartiallyReachable::new()))
                .expect("async cache"),
        ),
    ]
}
