//! Logic shared by the blocking and async caches: key and TTL resolution,
//! value coding, miss handling and instrumentation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::codec::{key, value};
use crate::error::{KvError, KvResult};
use crate::instrument::{Hook, Instrumentation, Operation, OperationEvent, Outcome};
use crate::store::{AsyncStore, BatchOutcome, BlockingStore};
use crate::wrappers::{ChainBuilder, Wrapper};

use super::{AsyncCache, Cache};

/// Expiry requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// The backend's configured `default_ttl`; no expiry when none is set.
    #[default]
    Default,
    Never,
    After(Duration),
}

impl Expiry {
    pub fn seconds(secs: u64) -> Self {
        Expiry::After(Duration::from_secs(secs))
    }
}

impl From<Duration> for Expiry {
    fn from(ttl: Duration) -> Self {
        Expiry::After(ttl)
    }
}

/// A logical key, optionally pinned to a version other than the backend's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey<'a> {
    pub key: &'a str,
    pub version: Option<u32>,
}

impl<'a> CacheKey<'a> {
    pub fn new(key: &'a str) -> Self {
        Self { key, version: None }
    }

    pub fn versioned(key: &'a str, version: u32) -> Self {
        Self {
            key,
            version: Some(version),
        }
    }
}

impl<'a> From<&'a str> for CacheKey<'a> {
    fn from(key: &'a str) -> Self {
        CacheKey::new(key)
    }
}

impl<'a> From<&'a String> for CacheKey<'a> {
    fn from(key: &'a String) -> Self {
        CacheKey::new(key.as_str())
    }
}

impl<'a> From<(&'a str, u32)> for CacheKey<'a> {
    fn from((key, version): (&'a str, u32)) -> Self {
        CacheKey::versioned(key, version)
    }
}

/// A write ready for the store.
pub(crate) struct PreparedWrite {
    pub key: String,
    pub bytes: Vec<u8>,
    pub ttl: Option<Duration>,
}

/// Physical keys for a bulk call, with the logical key each one came from.
pub(crate) struct KeyBatch {
    pub physical: Vec<String>,
    logical: HashMap<String, String>,
}

impl KeyBatch {
    fn logical(&self, physical: &str) -> String {
        self.logical
            .get(physical)
            .cloned()
            .unwrap_or_else(|| physical.to_string())
    }
}

pub(crate) struct CacheCore {
    namespace: String,
    version: u32,
    default_ttl: Option<Duration>,
    backend: String,
    hook: Hook,
}

impl CacheCore {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn physical_key(&self, key: CacheKey<'_>) -> KvResult<String> {
        key::validate(key.key)?;
        Ok(key::encode(
            &self.namespace,
            key.key,
            key.version.unwrap_or(self.version),
        ))
    }

    pub fn key_batch<K: AsRef<str>>(&self, keys: &[K], version: Option<u32>) -> KvResult<KeyBatch> {
        let mut physical = Vec::with_capacity(keys.len());
        let mut logical = HashMap::with_capacity(keys.len());
        for k in keys {
            let pk = self.physical_key(CacheKey {
                key: k.as_ref(),
                version,
            })?;
            logical.insert(pk.clone(), k.as_ref().to_string());
            physical.push(pk);
        }
        Ok(KeyBatch { physical, logical })
    }

    pub fn resolve_ttl(&self, expiry: Expiry) -> KvResult<Option<Duration>> {
        match expiry {
            Expiry::Default => Ok(self.default_ttl),
            Expiry::Never => Ok(None),
            Expiry::After(ttl) if ttl.is_zero() => {
                Err(KvError::invalid("ttl must be greater than zero"))
            }
            Expiry::After(ttl) => Ok(Some(ttl)),
        }
    }

    pub fn prepare<T: Serialize + ?Sized>(
        &self,
        key: CacheKey<'_>,
        value: &T,
        expiry: Expiry,
    ) -> KvResult<PreparedWrite> {
        Ok(PreparedWrite {
            key: self.physical_key(key)?,
            bytes: value::to_bytes(value)?,
            ttl: self.resolve_ttl(expiry)?,
        })
    }

    pub fn prepare_many<K, V, I>(
        &self,
        entries: I,
        version: Option<u32>,
    ) -> KvResult<(Vec<(String, Vec<u8>)>, HashMap<String, String>)>
    where
        K: AsRef<str>,
        V: Serialize,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut prepared = Vec::new();
        let mut logical = HashMap::new();
        for (k, v) in entries {
            let pk = self.physical_key(CacheKey {
                key: k.as_ref(),
                version,
            })?;
            logical.insert(pk.clone(), k.as_ref().to_string());
            prepared.push((pk, value::to_bytes(&v)?));
        }
        Ok((prepared, logical))
    }

    /// Decode a single read. Unreadable payloads become misses.
    pub fn read<T: DeserializeOwned>(
        &self,
        key: &str,
        raw: KvResult<Option<Vec<u8>>>,
    ) -> KvResult<(Option<T>, Outcome)> {
        match raw {
            Ok(Some(bytes)) => match value::from_bytes(bytes) {
                Ok(v) => Ok((Some(v), Outcome::Hit)),
                Err(e) => Ok((None, self.unreadable(key, &e))),
            },
            Ok(None) => Ok((None, Outcome::Miss)),
            Err(e @ KvError::Deserialization(_)) => Ok((None, self.unreadable(key, &e))),
            Err(e) => Err(e),
        }
    }

    /// Decode a bulk read in input order. Absent and unreadable keys are
    /// omitted; any other per-key error fails the call.
    pub fn read_many<T: DeserializeOwned>(
        &self,
        batch: &KeyBatch,
        outcome: BatchOutcome<Option<Vec<u8>>>,
    ) -> KvResult<(HashMap<String, T>, Outcome)> {
        let mut results: HashMap<String, KvResult<Option<Vec<u8>>>> = outcome.into_iter().collect();
        let mut found = HashMap::with_capacity(batch.physical.len());
        let (mut hits, mut misses) = (0u64, 0u64);
        for pk in &batch.physical {
            let Some(raw) = results.remove(pk) else {
                continue;
            };
            let logical = batch.logical(pk);
            match self.read::<T>(&logical, raw)? {
                (Some(v), _) => {
                    hits += 1;
                    found.insert(logical, v);
                }
                (None, _) => misses += 1,
            }
        }
        Ok((found, Outcome::Batch { hits, misses }))
    }

    /// Logical keys whose write failed, sorted.
    pub fn failed_writes(
        &self,
        outcome: &BatchOutcome<()>,
        logical: &HashMap<String, String>,
    ) -> Vec<String> {
        let mut failed: Vec<String> = outcome
            .failed_keys()
            .into_iter()
            .map(|pk| logical.get(&pk).cloned().unwrap_or(pk))
            .collect();
        failed.sort();
        failed
    }

    /// First per-key failure of a bulk delete, in input order.
    pub fn first_delete_error(
        &self,
        batch: &KeyBatch,
        outcome: BatchOutcome<bool>,
    ) -> KvResult<()> {
        let mut results: HashMap<String, KvResult<bool>> = outcome.into_iter().collect();
        for pk in &batch.physical {
            if let Some(Err(e)) = results.remove(pk) {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Current integer under a key, for `incr`.
    pub fn counter(&self, raw: Option<Vec<u8>>, key: &str) -> KvResult<i64> {
        let bytes = raw.ok_or_else(|| KvError::Value(format!("key '{}' not found", key)))?;
        value::from_bytes::<i64>(bytes)
            .map_err(|_| KvError::Value(format!("value of '{}' is not an integer", key)))
    }

    pub fn step(&self, current: i64, delta: i64, key: &str) -> KvResult<(i64, Vec<u8>)> {
        let next = current
            .checked_add(delta)
            .ok_or_else(|| KvError::Value(format!("incrementing '{}' overflows", key)))?;
        Ok((next, value::to_bytes(&next)?))
    }

    fn unreadable(&self, key: &str, error: &KvError) -> Outcome {
        warn!(
            namespace = %self.namespace,
            key,
            error = %error,
            "Unreadable cache payload treated as miss"
        );
        Outcome::Unreadable
    }

    pub fn begin<'a>(&'a self, operation: Operation, key: Option<&'a str>) -> OpScope<'a> {
        self.hook.start(operation, &self.backend, key);
        OpScope {
            core: self,
            operation,
            key,
            started: Instant::now(),
        }
    }
}

/// One in-flight operation; reports to the hook when finished.
pub(crate) struct OpScope<'a> {
    core: &'a CacheCore,
    operation: Operation,
    key: Option<&'a str>,
    started: Instant,
}

impl OpScope<'_> {
    pub fn finish<T>(self, result: KvResult<T>, outcome: impl FnOnce(&T) -> Outcome) -> KvResult<T> {
        let outcome = match &result {
            Ok(v) => outcome(v),
            Err(e) => Outcome::Failed(e.kind()),
        };
        self.core.hook.finish(&OperationEvent {
            operation: self.operation,
            backend: &self.core.backend,
            namespace: &self.core.namespace,
            key: self.key,
            outcome,
            duration: self.started.elapsed(),
        });
        result
    }

    /// Finish a call whose result carries its own outcome.
    pub fn finish_with<T>(self, result: KvResult<(T, Outcome)>) -> KvResult<T> {
        self.finish(result, |(_, outcome)| *outcome).map(|(v, _)| v)
    }
}

/// Builds a [`Cache`] or [`AsyncCache`] over a store.
///
/// ```ignore
/// let cache = CacheBuilder::new("app")
///     .default_ttl(Some(Duration::from_secs(300)))
///     .wrapper(Arc::new(CompressionWrapper::new(6)?))
///     .build(Box::new(MemoryStore::new(1000)?))?;
/// ```
pub struct CacheBuilder {
    namespace: String,
    version: u32,
    default_ttl: Option<Duration>,
    chain: ChainBuilder,
    hook: Hook,
    backend_name: Option<String>,
}

impl CacheBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: 1,
            default_ttl: None,
            chain: ChainBuilder::new(),
            hook: Hook::none(),
            backend_name: None,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn wrapper(mut self, wrapper: Arc<dyn Wrapper>) -> Self {
        self.chain.push(wrapper);
        self
    }

    pub fn chain(mut self, chain: ChainBuilder) -> Self {
        self.chain = chain;
        self
    }

    pub fn instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.hook = Hook::new(instrumentation);
        self
    }

    pub fn hook(mut self, hook: Hook) -> Self {
        self.hook = hook;
        self
    }

    /// Name reported to instrumentation; defaults to the store's own name.
    pub fn backend_name(mut self, name: impl Into<String>) -> Self {
        self.backend_name = Some(name.into());
        self
    }

    fn core(self, store_name: &str) -> KvResult<(CacheCore, ChainBuilder)> {
        if self.namespace.is_empty() {
            return Err(KvError::configuration("cache namespace must not be empty"));
        }
        if self.default_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(KvError::configuration("default_ttl must be greater than zero"));
        }
        let core = CacheCore {
            namespace: self.namespace,
            version: self.version,
            default_ttl: self.default_ttl,
            backend: self.backend_name.unwrap_or_else(|| store_name.to_string()),
            hook: self.hook,
        };
        Ok((core, self.chain))
    }

    pub fn build(self, store: Box<dyn BlockingStore>) -> KvResult<Cache> {
        let (core, chain) = self.core(store.name())?;
        Ok(Cache::from_parts(core, chain.build_blocking(store)))
    }

    pub fn build_async(self, store: Box<dyn AsyncStore>) -> KvResult<AsyncCache> {
        let (core, chain) = self.core(store.name())?;
        Ok(AsyncCache::from_parts(core, chain.build_async(store)))
    }
}
