//! Wrapper chain: transparent byte transforms folded around a store.
//!
//! A chain built from `[w1, w2]` runs `w1.on_write` then `w2.on_write` before
//! the physical put, and `w2.on_read` then `w1.on_read` after the physical get.

mod compression;
mod encryption;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::settings::{SecuritySettings, WrapperSettings};
use crate::error::{KvError, KvResult};
use crate::store::{AsyncStore, BatchOutcome, BlockingStore, StoreCapabilities};

pub use compression::CompressionWrapper;
pub use encryption::EncryptionWrapper;

/// A reversible byte transform.
pub trait Wrapper: Send + Sync {
    fn name(&self) -> &str;

    fn on_write(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>>;

    fn on_read(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>>;
}

/// Build a wrapper from its configuration record.
pub fn from_settings(
    settings: &WrapperSettings,
    security: &SecuritySettings,
) -> KvResult<Arc<dyn Wrapper>> {
    match settings {
        WrapperSettings::Encryption { key } => Ok(Arc::new(EncryptionWrapper::resolve(
            key.as_deref(),
            security,
        )?)),
        WrapperSettings::Compression { level } => Ok(Arc::new(CompressionWrapper::new(*level)?)),
    }
}

// Every failure inside a transform is reported as a wrapper error.
fn tag_error(wrapper: &dyn Wrapper, err: KvError) -> KvError {
    match err {
        e @ KvError::Wrapper { .. } => e,
        other => KvError::wrapper(wrapper.name(), other.to_string()),
    }
}

/// One node of the chain. Owns the next link or the terminal store.
pub struct WrapperLink<N: ?Sized> {
    wrapper: Arc<dyn Wrapper>,
    next: Box<N>,
}

impl<N: ?Sized> WrapperLink<N> {
    fn write(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        self.wrapper
            .on_write(bytes)
            .map_err(|e| tag_error(self.wrapper.as_ref(), e))
    }

    fn read(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        self.wrapper
            .on_read(bytes)
            .map_err(|e| tag_error(self.wrapper.as_ref(), e))
    }

    fn read_opt(&self, bytes: Option<Vec<u8>>) -> KvResult<Option<Vec<u8>>> {
        bytes.map(|b| self.read(b)).transpose()
    }

    /// Transform every entry, setting aside the ones whose transform failed.
    fn write_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
    ) -> (Vec<(String, Vec<u8>)>, Vec<(String, KvError)>) {
        let mut ready = Vec::with_capacity(entries.len());
        let mut failed = Vec::new();
        for (key, value) in entries {
            match self.write(value) {
                Ok(bytes) => ready.push((key, bytes)),
                Err(e) => failed.push((key, e)),
            }
        }
        (ready, failed)
    }
}

fn merge_failures(
    mut outcome: BatchOutcome<()>,
    failed: Vec<(String, KvError)>,
) -> KvResult<BatchOutcome<()>> {
    for (key, err) in failed {
        outcome.record(key, Err(err))?;
    }
    Ok(outcome)
}

impl BlockingStore for WrapperLink<dyn BlockingStore> {
    fn name(&self) -> &str {
        self.next.name()
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.next.capabilities()
    }

    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let raw = self.next.get(key)?;
        self.read_opt(raw)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        self.next.put(key, self.write(value)?, ttl)
    }

    fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<bool> {
        self.next.put_if_absent(key, self.write(value)?, ttl)
    }

    fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        self.next.update(key, self.write(value)?)
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        self.next.delete(key)
    }

    fn exists(&self, key: &str) -> KvResult<bool> {
        self.next.exists(key)
    }

    fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        self.next.touch(key, ttl)
    }

    fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        Ok(self.next.get_many(keys)?.map(|raw| self.read_opt(raw)))
    }

    fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        let (ready, failed) = self.write_many(entries);
        merge_failures(self.next.put_many(ready, ttl)?, failed)
    }

    fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        self.next.delete_many(keys)
    }

    fn clear(&self, namespace: &str) -> KvResult<u64> {
        self.next.clear(namespace)
    }

    fn flush(&self) -> KvResult<()> {
        self.next.flush()
    }
}

#[async_trait]
impl AsyncStore for WrapperLink<dyn AsyncStore> {
    fn name(&self) -> &str {
        self.next.name()
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.next.capabilities()
    }

    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let raw = self.next.get(key).await?;
        self.read_opt(raw)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KvResult<()> {
        let bytes = self.write(value)?;
        self.next.put(key, bytes, ttl).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<bool> {
        let bytes = self.write(value)?;
        self.next.put_if_absent(key, bytes, ttl).await
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> KvResult<bool> {
        let bytes = self.write(value)?;
        self.next.update(key, bytes).await
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        self.next.delete(key).await
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.next.exists(key).await
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> KvResult<bool> {
        self.next.touch(key, ttl).await
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<BatchOutcome<Option<Vec<u8>>>> {
        let raw = self.next.get_many(keys).await?;
        Ok(raw.map(|bytes| self.read_opt(bytes)))
    }

    async fn put_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> KvResult<BatchOutcome<()>> {
        let (ready, failed) = self.write_many(entries);
        let outcome = self.next.put_many(ready, ttl).await?;
        merge_failures(outcome, failed)
    }

    async fn delete_many(&self, keys: &[String]) -> KvResult<BatchOutcome<bool>> {
        self.next.delete_many(keys).await
    }

    async fn clear(&self, namespace: &str) -> KvResult<u64> {
        self.next.clear(namespace).await
    }

    async fn flush(&self) -> KvResult<()> {
        self.next.flush().await
    }
}

/// Ordered list of wrappers, folded around a store once at construction.
#[derive(Clone, Default)]
pub struct ChainBuilder {
    wrappers: Vec<Arc<dyn Wrapper>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, wrapper: Arc<dyn Wrapper>) -> &mut Self {
        self.wrappers.push(wrapper);
        self
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.wrappers.iter().map(|w| w.name().to_string()).collect()
    }

    pub fn build_blocking(&self, store: Box<dyn BlockingStore>) -> Box<dyn BlockingStore> {
        self.wrappers
            .iter()
            .rev()
            .fold(store, |next, wrapper| -> Box<dyn BlockingStore> {
                Box::new(WrapperLink {
                    wrapper: Arc::clone(wrapper),
                    next,
                })
            })
    }

    pub fn build_async(&self, store: Box<dyn AsyncStore>) -> Box<dyn AsyncStore> {
        self.wrappers
            .iter()
            .rev()
            .fold(store, |next, wrapper| -> Box<dyn AsyncStore> {
                Box::new(WrapperLink {
                    wrapper: Arc::clone(wrapper),
                    next,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    /// Appends a marker byte on write and checks it on read, logging the call
    /// order to a shared journal.
    struct Marker {
        name: String,
        byte: u8,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Marker {
        fn new(name: &str, byte: u8, journal: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Wrapper> {
            Arc::new(Self {
                name: name.to_string(),
                byte,
                journal: Arc::clone(journal),
            })
        }
    }

    impl Wrapper for Marker {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_write(&self, mut bytes: Vec<u8>) -> KvResult<Vec<u8>> {
            self.journal.lock().unwrap().push(format!("write:{}", self.name));
            bytes.push(self.byte);
            Ok(bytes)
        }

        fn on_read(&self, mut bytes: Vec<u8>) -> KvResult<Vec<u8>> {
            self.journal.lock().unwrap().push(format!("read:{}", self.name));
            match bytes.pop() {
                Some(b) if b == self.byte => Ok(bytes),
                _ => Err(KvError::Deserialization("marker missing".into())),
            }
        }
    }

    fn chain(journal: &Arc<Mutex<Vec<String>>>) -> ChainBuilder {
        let mut builder = ChainBuilder::new();
        builder
            .push(Marker::new("first", b'1', journal))
            .push(Marker::new("second", b'2', journal));
        builder
    }

    #[test]
    fn test_write_in_order_read_in_reverse() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let store = chain(&journal).build_blocking(Box::new(MemoryStore::new(8).unwrap()));

        store.put("k", b"v".to_vec(), None).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["write:first", "write:second", "read:second", "read:first"]
        );
    }

    #[test]
    fn test_read_failure_is_wrapper_error() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let memory = Arc::new(MemoryStore::new(8).unwrap());
        BlockingStore::put(memory.as_ref(), "k", b"tampered".to_vec(), None).unwrap();

        let store = chain(&journal).build_blocking(Box::new(Arc::clone(&memory)));
        let err = store.get("k").unwrap_err();
        assert!(matches!(err, KvError::Wrapper { ref wrapper, .. } if wrapper == "second"));
    }

    #[test]
    fn test_empty_chain_is_the_store() {
        let store = ChainBuilder::new().build_blocking(Box::new(MemoryStore::new(8).unwrap()));
        assert_eq!(store.name(), "memory");
        store.put("k", b"raw".to_vec(), None).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"raw".to_vec()));
    }

    #[tokio::test]
    async fn test_async_chain_bulk() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let store = chain(&journal).build_async(Box::new(MemoryStore::new(8).unwrap()));
        let outcome = store
            .put_many(
                vec![("a".into(), b"1".to_vec()), ("b".into(), b"2".to_vec())],
                None,
            )
            .await
            .unwrap();
        assert!(outcome.failed_keys().is_empty());
        let got = store
            .get_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert!(matches!(got.get("a"), Some(Ok(Some(v))) if v == b"1"));
        assert!(matches!(got.get("c"), Some(Ok(None))));
    }
}
