use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{KvError, KvResult};
use crate::instrument::{Operation, Outcome};
use crate::store::BlockingStore;

use super::core::{CacheCore, CacheKey, Expiry};

/// Blocking cache backend over one (possibly wrapped) store.
pub struct Cache {
    core: CacheCore,
    store: Box<dyn BlockingStore>,
}

impl Cache {
    pub(crate) fn from_parts(core: CacheCore, store: Box<dyn BlockingStore>) -> Self {
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

    pub fn get<'k, T: DeserializeOwned>(&self, key: impl Into<CacheKey<'k>>) -> KvResult<Option<T>> {
        let key = key.into();
        let scope = self.core.begin(Operation::Get, Some(key.key));
        let result = self
            .core
            .physical_key(key)
            .and_then(|pk| self.core.read(key.key, self.store.get(&pk)));
        scope.finish_with(result)
    }

    pub fn get_or<'k, T: DeserializeOwned>(
        &self,
        key: impl Into<CacheKey<'k>>,
        default: T,
    ) -> KvResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn set<'k, T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey<'k>>,
        value: &T,
        expiry: Expiry,
    ) -> KvResult<()> {
        let key = key.into();
        let scope = self.core.begin(Operation::Set, Some(key.key));
        let result = self
            .core
            .prepare(key, value, expiry)
            .and_then(|w| self.store.put(&w.key, w.bytes, w.ttl));
        scope.finish(result, |_| Outcome::Success)
    }

    /// Store `value` only if the key is absent. Returns whether it was stored.
    pub fn add<'k, T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey<'k>>,
        value: &T,
        expiry: Expiry,
    ) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::Add, Some(key.key));
        let result = self
            .core
            .prepare(key, value, expiry)
            .and_then(|w| self.store.put_if_absent(&w.key, w.bytes, w.ttl));
        scope.finish(result, |_| Outcome::Success)
    }

    pub fn delete<'k>(&self, key: impl Into<CacheKey<'k>>) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::Delete, Some(key.key));
        let result = self
            .core
            .physical_key(key)
            .and_then(|pk| self.store.delete(&pk));
        scope.finish(result, |_| Outcome::Success)
    }

    pub fn has_key<'k>(&self, key: impl Into<CacheKey<'k>>) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::HasKey, Some(key.key));
        let result = self
            .core
            .physical_key(key)
            .and_then(|pk| self.store.exists(&pk));
        scope.finish(result, |found| if *found { Outcome::Hit } else { Outcome::Miss })
    }

    /// Fetch several keys at once. Absent or unreadable keys are left out of
    /// the result.
    pub fn get_many<K: AsRef<str>, T: DeserializeOwned>(
        &self,
        keys: &[K],
        version: Option<u32>,
    ) -> KvResult<HashMap<String, T>> {
        let scope = self.core.begin(Operation::GetMany, None);
        let result = self.core.key_batch(keys, version).and_then(|batch| {
            let outcome = self.store.get_many(&batch.physical)?;
            self.core.read_many(&batch, outcome)
        });
        scope.finish_with(result)
    }

    /// Store several entries at once. Returns the keys that could not be
    /// written.
    pub fn set_many<K, V, I>(
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
        let result: KvResult<Vec<String>> = (|| {
            let ttl = self.core.resolve_ttl(expiry)?;
            let (prepared, logical) = self.core.prepare_many(entries, version)?;
            let outcome = self.store.put_many(prepared, ttl)?;
            Ok(self.core.failed_writes(&outcome, &logical))
        })();
        scope.finish(result, |_| Outcome::Success)
    }

    pub fn delete_many<K: AsRef<str>>(&self, keys: &[K], version: Option<u32>) -> KvResult<()> {
        let scope = self.core.begin(Operation::DeleteMany, None);
        let result = self.core.key_batch(keys, version).and_then(|batch| {
            let outcome = self.store.delete_many(&batch.physical)?;
            self.core.first_delete_error(&batch, outcome)
        });
        scope.finish(result, |_| Outcome::Success)
    }

    /// Remove every entry in this cache's namespace, across all versions.
    pub fn clear(&self) -> KvResult<u64> {
        let scope = self.core.begin(Operation::Clear, None);
        let result = self.store.clear(self.core.namespace());
        scope.finish(result, |_| Outcome::Success)
    }

    pub fn touch<'k>(&self, key: impl Into<CacheKey<'k>>, expiry: Expiry) -> KvResult<bool> {
        let key = key.into();
        let scope = self.core.begin(Operation::Touch, Some(key.key));
        let result = (|| {
            let pk = self.core.physical_key(key)?;
            let ttl = self.core.resolve_ttl(expiry)?;
            self.store.touch(&pk, ttl)
        })();
        scope.finish(result, |_| Outcome::Success)
    }

    /// Add `delta` to an integer value and return the new value. Not atomic
    /// across callers.
    pub fn incr<'k>(&self, key: impl Into<CacheKey<'k>>, delta: i64) -> KvResult<i64> {
        let key = key.into();
        let scope = self.core.begin(Operation::Incr, Some(key.key));
        let result: KvResult<i64> = (|| {
            let pk = self.core.physical_key(key)?;
            let current = self.core.counter(self.store.get(&pk)?, key.key)?;
            let (next, bytes) = self.core.step(current, delta, key.key)?;
            if !self.store.update(&pk, bytes)? {
                // Expired or deleted between the read and the write.
                return Err(KvError::Value(format!(
                    "key '{}' not found",
                    key.key
                )));
            }
            Ok(next)
        })();
        scope.finish(result, |_| Outcome::Success)
    }

    pub fn decr<'k>(&self, key: impl Into<CacheKey<'k>>, delta: i64) -> KvResult<i64> {
        let delta = delta
            .checked_neg()
            .ok_or_else(|| KvError::Value("decrement overflows".into()))?;
        self.incr(key, delta)
    }

    /// Persist buffered writes in the underlying store.
    pub fn flush(&self) -> KvResult<()> {
        self.store.flush()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("namespace", &self.core.namespace())
            .field("version", &self.core.version())
            .field("backend", &self.core.backend())
            .finish()
    }
}
