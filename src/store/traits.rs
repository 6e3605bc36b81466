//! Store protocol: the minimal capability set every physical backend provides.
//!
//! There are two flavours with identical semantics. [`BlockingStore`] calls may
//! block the calling thread on I/O; [`AsyncStore`] calls are suspension points.
//! A store may implement both.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{KvError, KvResult};

/// How far a store can be trusted under concurrent callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Safe to share between threads and tasks without outside locking.
    Shared,
    /// Callers must serialize access themselves.
    ExternalSync,
}

/// Atomicity of [`BlockingStore::put_if_absent`] / [`AsyncStore::put_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddAtomicity {
    /// A true compare-and-swap in the engine; no race window.
    CompareAndSwap,
    /// Atomic among callers in this process, racy across processes.
    ProcessLocal,
    /// Separate existence check and write; concurrent adds may both succeed.
    CheckThenSet,
}

/// Declared properties of a store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub concurrency: Concurrency,
    pub add: AddAtomicity,
}

/// Per-key results of a bulk call.
///
/// A bulk call only fails as a whole when the store is unreachable; every
/// other failure is recorded against the key it concerns.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    results: HashMap<String, KvResult<T>>,
}

impl<T> BatchOutcome<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: HashMap::with_capacity(capacity),
        }
    }

    /// Record the outcome for `key`, or abort the batch if the error says the
    /// store itself is gone.
    pub fn record(&mut self, key: impl Into<String>, result: KvResult<T>) -> KvResult<()> {
        match result {
            Err(e) if e.aborts_batch() => Err(e),
            other => {
                self.results.insert(key.into(), other);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&KvResult<T>> {
        self.results.get(key)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> KvResult<U>) -> BatchOutcome<U> {
        BatchOutcome {
            results: self
                .results
                .into_iter()
                .map(|(k, r)| (k, r.and_then(&mut f)))
                .collect(),
        }
    }
}

impl<T> IntoIterator for BatchOutcome<T> {
    type Item = (String, KvResult<T>);
    type IntoIter = std::collections::hash_map::IntoIter<String, KvResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Reject TTLs the protocol does not allow. `None` means "never expires".
pub fn check_ttl(ttl: Option<Duration>) -> KvResult<()> {
    match ttl {
        Some(d) if d.is_zero() => Err(KvError::invalid("ttl must be greater than zero")),
        _ => Ok(()),
    }
}

/// Blocking store protocol.
pub trait BlockingStore: Send + Sync {
    /// Short backend name used in logs and instrumentation.
    fn name(&self) -> &str;

    fn capabilities(&self) -> StoreCapabilities;

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()>;

    /// Write only if `key` is absent. The default is a check-then-set with a
    /// race window; see [`StoreCapabilities::add`].
    fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<bool> {
        check_ttl(ttl)?;
        if self.exists(key)? {
            return Ok(false);
        }
        self.put(key, value, ttl)?;
        Ok(true)
    }

    /// Replace the value of an existing key, keeping its expiry.
    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool>;

    fn delete(&self, key: &str) -> KvResult<bool>;

    fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Reset the expiry of an existing key without rewriting it.
    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool>;

    fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        let mut outcome = BatchOutcome::with_capacity(keys.len());
        for key in keys {
            outcome.record(key.as_str(), self.get(key))?;
        }
        Ok(outcome)
    }

    fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        check_ttl(ttl)?;
        let mut outcome = BatchOutcome::with_capacity(entries.len());
        for (key, value) in entries {
            let result = self.put(&key, value, ttl);
            outcome.record(key, result)?;
        }
        Ok(outcome)
    }

    fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        let mut outcome = BatchOutcome::with_capacity(keys.len());
        for key in keys {
            outcome.record(key.as_str(), self.delete(key))?;
        }
        Ok(outcome)
    }

    /// Remove every key in `namespace`; returns how many were removed.
    fn clear(&self, namespace: &str) -> KvResult<u64>;

    /// Persist buffered writes.
    fn flush(&self) -> KvResult<()> {
        Ok(())
    }
}

/// Async store protocol. Same contract as [`BlockingStore`].
#[async_trait]
pub trait AsyncStore: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> StoreCapabilities;

    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()>;

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        check_ttl(ttl)?;
        if self.exists(key).await? {
            return Ok(false);
        }
        self.put(key, value, ttl).await?;
        Ok(true)
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool>;

    async fn delete(&self, key: &str) -> KvResult<bool>;

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool>;

    async fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        let mut outcome = BatchOutcome::with_capacity(keys.len());
        for key in keys {
            outcome.record(key.as_str(), self.get(key).await)?;
        }
        Ok(outcome)
    }

    async fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        check_ttl(ttl)?;
        let mut outcome = BatchOutcome::with_capacity(entries.len());
        for (key, value) in entries {
            let result = self.put(&key, value, ttl).await;
            outcome.record(key, result)?;
        }
        Ok(outcome)
    }

    async fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        let mut outcome = BatchOutcome::with_capacity(keys.len());
        for key in keys {
            outcome.record(key.as_str(), self.delete(key).await)?;
        }
        Ok(outcome)
    }

    async fn clear(&self, namespace: &str) -> KvResult<u64>;

    async fn flush(&self) -> KvResult<()> {
        Ok(())
    }
}

// A shared handle is a store too, so one physical store can sit under several
// chains (and be inspected raw).
impl<S: BlockingStore + ?Sized> BlockingStore for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capabilities(&self) -> StoreCapabilities {
        (**self).capabilities()
    }

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        (**self).put(key, value, ttl)
    }

    fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<bool> {
        (**self).put_if_absent(key, value, ttl)
    }

    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        (**self).update(key, value)
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> KvResult<bool> {
        (**self).exists(key)
    }

    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        (**self).touch(key, ttl)
    }

    fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        (**self).get_many(keys)
    }

    fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        (**self).put_many(entries, ttl)
    }

    fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        (**self).delete_many(keys)
    }

    fn clear(&self, namespace: &str) -> KvResult<u64> {
        (**self).clear(namespace)
    }

    fn flush(&self) -> KvResult<()> {
        (**self).flush()
    }
}

#[async_trait]
impl<S: AsyncStore + ?Sized> AsyncStore for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capabilities(&self) -> StoreCapabilities {
        (**self).capabilities()
    }

    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        (**self).put(key, value, ttl).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        (**self).put_if_absent(key, value, ttl).await
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        (**self).update(key, value).await
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        (**self).exists(key).await
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        (**self).touch(key, ttl).await
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        (**self).get_many(keys).await
    }

    async fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        (**self).put_many(entries, ttl).await
    }

    async fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        (**self).delete_many(keys).await
    }

    async fn clear(&self, namespace: &str) -> KvResult<u64> {
        (**self).clear(namespace).await
    }

    async fn flush(&self) -> KvResult<()> {
        (**self).flush().await
    }
}
