use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{KvError, KvResult};
use crate::instrument::{Operation, Outcome};
use crate::store::AsyncStore;

use super::core::{CacheCore, CacheKey, Expiry};

/// Async cache backend. Same contract as [`Cache`](super::Cache).
pub struct AsyncCache {
    core: CacheCore,
    store: Box<dyn AsyncStore>,
}

impl AsyncCache {
    pub(crate) fn from_parts(core: CacheCore, store: Box<dyn AsyncStore>) -> Self {
        Self { core, store }
    }

    pub fn namespace(&self) -> &str {
        self.core.namespace()
    }

    pub fn version(&self) -> u32 {
        self.core.version()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.core.default_ttl()
    }

    pub fn backend_name(&self) -> &str {
        self.core.backend()
    }

    pub async fn get<'k, T: DeserializeOwned>(
        &self,
        key: impl Into<CacheKey<'k>>,
    ) -> KvResult<Option<T>> {
        let key = key.into();
        let scope = self.core.begin(Operation::Get, Some(key.key));
        let result = match self.core.physical_key(key) {
            Ok(pk) => {
                let raw = self.store.get(&pk).await;
                self.core.read(key.key, raw)
            }
            Err(e) => Err(e),
        };
        scope.finish_with(result)
    }

    pub async fn get_or<'k, T: DeserializeOwned>(
        &self,
        key: impl Into<CacheKey<'k>>,
        default: T,
    ) -> KvResult<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    pub async fn set<'k, T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey<'k>>,
        value: &T,
        expiry: Expiry,
    ) -> KvResult<()> {
        let key = key.into();
        let scope = self.core.begin(Operation::Set, Some(key.key));
        let result = match self.core.prepare(key, value, expiry) {
            Ok(w) => self.store.put(&w.key, w.bytes, w.ttl).await,
            Err(e) => Err(e),
        };
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn add<'k, T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey<'k>>,
        value: &T,
        expiry: Expiry,
    ) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::Add, Some(key.key));
        let result = match self.core.prepare(key, value, expiry) {
            Ok(w) => self.store.put_if_absent(&w.key, w.bytes, w.ttl).await,
            Err(e) => Err(e),
        };
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn delete<'k>(&self, key: impl Into<CacheKey<'k>>) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::Delete, Some(key.key));
        let result = match self.core.physical_key(key) {
            Ok(pk) => self.store.delete(&pk).await,
            Err(e) => Err(e),
        };
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn has_key<'k>(&self, key: impl Into<CacheKey<'k>>) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::HasKey, Some(key.key));
        let result = match self.core.physical_key(key) {
            Ok(pk) => self.store.exists(&pk).await,
            Err(e) => Err(e),
        };
        scope.finish(result, |found| if *found { Outcome::Hit } else { Outcome::Miss })
    }

    pub async fn get_many<K: AsRef<str>, T: DeserializeOwned>(
        &self,
        keys: &[K],
        version: Option<u32>,
    ) -> KvResult<HashMap<String, T>> {
        let scope = self.core.begin(Operation::GetMany, None);
        let result = async {
            let batch = self.core.key_batch(keys, version)?;
            let outcome = self.store.get_many(&batch.physical).await?;
            self.core.read_many(&batch, outcome)
        }
        .await;
        scope.finish_with(result)
    }

    pub async fn set_many<K, V, I>(
        &self,
        entries: I,
        expiry: Expiry,
        version: Option<u32>,
    ) -> KvResult<Vec<String>>
    where
        K: AsRef<str>,
        V: Serialize,
        I: IntoIterator<Item = (K, V)>,
    {
        let scope = self.core.begin(Operation::SetMany, None);
        let prepared = self
            .core
            .resolve_ttl(expiry)
            .and_then(|ttl| Ok((ttl, self.core.prepare_many(entries, version)?)));
        let result = match prepared {
            Ok((ttl, (entries, logical))) => self
                .store
                .put_many(entries, ttl)
                .await
                .map(|outcome| self.core.failed_writes(&outcome, &logical)),
            Err(e) => Err(e),
        };
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn delete_many<K: AsRef<str>>(
        &self,
        keys: &[K],
        version: Option<u32>,
    ) -> KvResult<()> {
        let scope = self.core.begin(Operation::DeleteMany, None);
        let result = async {
            let batch = self.core.key_batch(keys, version)?;
            let outcome = self.store.delete_many(&batch.physical).await?;
            self.core.first_delete_error(&batch, outcome)
        }
        .await;
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn clear(&self) -> KvResult<u64> {
        let scope = self.core.begin(Operation::Clear, None);
        let result = self.store.clear(self.core.namespace()).await;
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn touch<'k>(&self, key: impl Into<CacheKey<'k>>, expiry: Expiry) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::Touch, Some(key.key));
        let result = async {
            let pk = self.core.physical_key(key)?;
            let ttl = self.core.resolve_ttl(expiry)?;
            self.store.touch(&pk, ttl).await
        }
        .await;
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn incr<'k>(&self, key: impl Into<CacheKey<'k>>, delta: i64) -> KvResult<i64> {
        let key = key.into();
        let scope = self.core.begin(Operation::Incr, Some(key.key));
        let result: KvResult<i64> = async {
            let pk = self.core.physical_key(key)?;
            let current = self.core.counter(self.store.get(&pk).await?, key.key)?;
            let (next, bytes) = self.core.step(current, delta, key.key)?;
            if !self.store.update(&pk, bytes).await? {
                return Err(KvError::Value(format!("key '{}' not found", key.key)));
            }
            Ok(next)
        }
        .await;
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn decr<'k>(&self, key: impl Into<CacheKey<'k>>, delta: i64) -> KvResult<i64> {
        let delta = delta
            .checked_neg()
            .ok_or_else(|| KvError::Value("decrement overflows".into()))?;
        self.incr(key, delta).await
    }

    pub async fn flush(&self) -> KvResult<()> {
        self.store.flush().await
    }
}

impl std::fmt::Debug for AsyncCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCache")
            .field("namespace", &self.core.namespace())
            .field("version", &self.core.version())
            .field("backend", &self.core.backend())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::CacheBuilder;
    use crate::instrument::MetricsInstrumentation;
    use crate::store::{DiskStore, MemoryStore};
    use tempfile::TempDir;

    fn cache() -> AsyncCache {
        CacheBuilder::new("test")
            .build_async(Box::new(MemoryStore::new(100).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_get_add_delete() {
        let cache = cache();
        assert_eq!(cache.get::<String>("k").await.unwrap(), None);
        cache.set("k", "v", Expiry::Default).await.unwrap();
        assert!(!cache.add("k", "other", Expiry::Default).await.unwrap());
        assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get_or("k", 3u8).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bulk_and_counters() {
        let cache = cache();
        let failed = cache
            .set_many(vec![("a", 1i64), ("b", 2)], Expiry::Default, None)
            .await
            .unwrap();
        assert!(failed.is_empty());
        let found: HashMap<String, i64> = cache.get_many(&["a", "b", "c"], None).await.unwrap();
        assert_eq!(found.len(), 2);

        assert_eq!(cache.incr("a", 41).await.unwrap(), 42);
        assert_eq!(cache.decr("b", 2).await.unwrap(), 0);

        cache.delete_many(&["a", "b"], None).await.unwrap();
        assert!(!cache.has_key("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_backed_cache_reports_hits() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(MetricsInstrumentation::new());
        let store = DiskStore::in_directory(dir.path(), "async-cache").unwrap();
        let cache = CacheBuilder::new("disk")
            .default_ttl(Some(Duration::from_secs(60)))
            .instrumentation(metrics.clone())
            .build_async(Box::new(store))
            .unwrap();

        cache.set("k", &vec![1u8, 2, 3], Expiry::Default).await.unwrap();
        assert_eq!(cache.get::<Vec<u8>>("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cache.get::<Vec<u8>>("missing").await.unwrap(), None);
        assert_eq!(cache.clear().await.unwrap(), 1);

        let get = metrics.totals(Operation::Get);
        assert_eq!((get.requests, get.hits, get.misses), (2, 1, 1));
    }
}
