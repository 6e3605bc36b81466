//! Startup registry: resolves configured aliases to caches and session stores.
//!
//! A [`KvContext`] is built once from [`Settings`] and handed to whatever
//! needs a cache. Each alias opens its store once; the blocking and async
//! front ends of an alias share it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{AsyncCache, Cache, CacheBuilder};
use crate::config::settings::{
    BackendKind, CacheSettings, ObservabilitySettings, SecuritySettings, SessionEngine,
    SessionSettings, Settings,
};
use crate::error::{KvError, KvResult};
use crate::instrument::{Fanout, Hook, Instrumentation, MetricsInstrumentation, TracingInstrumentation};
use crate::session::{AsyncSessionStore, SessionStore};
use crate::store::{
    AsyncStore, BlockingRedisStore, BlockingStore, DiskStore, DiskStoreConfig, MemoryStore,
    RedisOptions, RedisStore, RedisStoreConfig,
};
use crate::wrappers::{self, ChainBuilder, EncryptionWrapper};

/// Entry bound for memory aliases without `max_size`.
pub const DEFAULT_MEMORY_MAX_SIZE: u64 = 10_000;

/// Store handles opened for one alias. A family the alias's mode excludes is
/// never opened.
struct StoreHandles {
    blocking: Option<Arc<dyn BlockingStore>>,
    asynchronous: Option<Arc<dyn AsyncStore>>,
}

impl BackendKind {
    /// Open the stores for one alias.
    async fn open(&self, alias: &str, settings: &CacheSettings) -> KvResult<StoreHandles> {
        let mode = settings.mode;
        match self {
            BackendKind::Memory => {
                reject_options(alias, settings)?;
                let max_size = settings.max_size.unwrap_or(DEFAULT_MEMORY_MAX_SIZE);
                let max_size = usize::try_from(max_size).map_err(|_| {
                    KvError::configuration(format!("caches.{}.max_size is too large", alias))
                })?;
                let store = Arc::new(MemoryStore::new(max_size)?);
                Ok(StoreHandles {
                    blocking: mode
                        .allows_blocking()
                        .then(|| Arc::clone(&store) as Arc<dyn BlockingStore>),
                    asynchronous: mode
                        .allows_async()
                        .then(|| store as Arc<dyn AsyncStore>),
                })
            }
            BackendKind::Disk => {
                reject_options(alias, settings)?;
                let directory = settings.directory.clone().ok_or_else(|| {
                    KvError::configuration(format!("caches.{}.directory is required", alias))
                })?;
                let store = DiskStore::open(&DiskStoreConfig {
                    directory,
                    name: alias.to_string(),
                    max_size: settings.max_size,
                })?;
                Ok(StoreHandles {
                    blocking: mode
                        .allows_blocking()
                        .then(|| Arc::new(store.clone()) as Arc<dyn BlockingStore>),
                    asynchronous: mode
                        .allows_async()
                        .then(|| Arc::new(store) as Arc<dyn AsyncStore>),
                })
            }
            BackendKind::Redis => {
                let options: RedisOptions =
                    serde_json::from_value(serde_json::Value::Object(settings.options.clone()))
                        .map_err(|e| {
                            KvError::configuration(format!("caches.{}.options: {}", alias, e))
                        })?;
                let url = RedisStoreConfig::url_for(
                    &settings.host,
                    settings.port,
                    settings.db,
                    settings.password.as_deref(),
                );
                let config = RedisStoreConfig::new(url, options);
                let mut handles = StoreHandles {
                    blocking: None,
                    asynchronous: None,
                };
                if mode.allows_blocking() {
                    let store = BlockingRedisStore::connect(&config)?;
                    handles.blocking = Some(Arc::new(store) as Arc<dyn BlockingStore>);
                }
                if mode.allows_async() {
                    let store = RedisStore::connect(&config).await?;
                    handles.asynchronous = Some(Arc::new(store) as Arc<dyn AsyncStore>);
                }
                Ok(handles)
            }
        }
    }
}

fn reject_options(alias: &str, settings: &CacheSettings) -> KvResult<()> {
    match settings.options.keys().next() {
        Some(name) => Err(KvError::configuration(format!(
            "caches.{}.options: unknown option '{}' for the {} backend",
            alias, name, settings.backend
        ))),
        None => Ok(()),
    }
}

fn chain_for(settings: &CacheSettings, security: &SecuritySettings) -> KvResult<ChainBuilder> {
    let mut chain = ChainBuilder::new();
    for wrapper in &settings.wrappers {
        chain.push(wrappers::from_settings(wrapper, security)?);
    }
    Ok(chain)
}

fn builder_for(alias: &str, settings: &CacheSettings, chain: &ChainBuilder, hook: &Hook) -> CacheBuilder {
    CacheBuilder::new(settings.collection.clone())
        .version(settings.version)
        .default_ttl(settings.default_ttl())
        .chain(chain.clone())
        .hook(hook.clone())
        .backend_name(alias)
}

impl StoreHandles {
    /// Front ends over these stores, one per opened family.
    fn caches(
        &self,
        alias: &str,
        settings: &CacheSettings,
        chain: &ChainBuilder,
        hook: &Hook,
    ) -> KvResult<(Option<Arc<Cache>>, Option<Arc<AsyncCache>>)> {
        let cache = match &self.blocking {
            Some(store) => Some(Arc::new(
                builder_for(alias, settings, chain, hook).build(Box::new(Arc::clone(store)))?,
            )),
            None => None,
        };
        let async_cache = match &self.asynchronous {
            Some(store) => Some(Arc::new(
                builder_for(alias, settings, chain, hook)
                    .build_async(Box::new(Arc::clone(store)))?,
            )),
            None => None,
        };
        Ok((cache, async_cache))
    }
}

/// Hooks for cache and session operations plus the shared metrics sink.
struct Observers {
    cache: Hook,
    sessions: Hook,
    metrics: Option<Arc<MetricsInstrumentation>>,
}

impl Observers {
    fn from_settings(settings: &ObservabilitySettings) -> Self {
        if !settings.enabled {
            return Self {
                cache: Hook::none(),
                sessions: Hook::none(),
                metrics: None,
            };
        }

        let metrics = settings
            .metrics_enabled
            .then(|| Arc::new(MetricsInstrumentation::new()));
        let mut hooks: Vec<Arc<dyn Instrumentation>> = vec![Arc::new(TracingInstrumentation)];
        if let Some(metrics) = &metrics {
            hooks.push(Arc::clone(metrics) as Arc<dyn Instrumentation>);
        }
        let hook = Hook::new(Arc::new(Fanout::new(hooks)));

        Self {
            cache: if settings.instrument_cache {
                hook.clone()
            } else {
                Hook::none()
            },
            sessions: if settings.instrument_sessions {
                hook
            } else {
                Hook::none()
            },
            metrics,
        }
    }
}

struct AliasEntry {
    backend: BackendKind,
    cache: Option<Arc<Cache>>,
    async_cache: Option<Arc<AsyncCache>>,
}

#[derive(Default)]
struct SessionEntry {
    blocking: Option<Arc<SessionStore>>,
    asynchronous: Option<Arc<AsyncSessionStore>>,
}

/// Every configured cache alias and, when enabled, the session stores.
pub struct KvContext {
    aliases: BTreeMap<String, AliasEntry>,
    sessions: Option<SessionEntry>,
    metrics: Option<Arc<MetricsInstrumentation>>,
}

impl KvContext {
    /// Open every alias in `settings.caches` and build the session stores.
    ///
    /// # Errors
    ///
    /// `Configuration` for settings a store constructor rejects, or any error
    /// a store raises while opening.
    pub async fn connect(settings: &Settings) -> KvResult<Self> {
        let observers = Observers::from_settings(&settings.observability);
        let mut aliases = BTreeMap::new();
        let mut handles = BTreeMap::new();

        for (alias, cache_settings) in &settings.caches {
            let stores = cache_settings.backend.open(alias, cache_settings).await?;
            let chain = chain_for(cache_settings, &settings.security)?;

            let (cache, async_cache) =
                stores.caches(alias, cache_settings, &chain, &observers.cache)?;

            debug!(
                alias = %alias,
                backend = %cache_settings.backend,
                mode = ?cache_settings.mode,
                wrappers = cache_settings.wrappers.len(),
                "Cache alias opened"
            );
            aliases.insert(
                alias.clone(),
                AliasEntry {
                    backend: cache_settings.backend,
                    cache,
                    async_cache,
                },
            );
            handles.insert(alias.clone(), stores);
        }

        let sessions = if settings.sessions.enabled {
            Some(Self::open_sessions(
                settings,
                &settings.sessions,
                &aliases,
                &handles,
                &observers,
            )?)
        } else {
            None
        };

        info!(
            aliases = aliases.len(),
            sessions = sessions.is_some(),
            instrumented = observers.cache.is_enabled() || observers.sessions.is_enabled(),
            "Cache context ready"
        );

        Ok(Self {
            aliases,
            sessions,
            metrics: observers.metrics,
        })
    }

    fn open_sessions(
        settings: &Settings,
        sessions: &SessionSettings,
        aliases: &BTreeMap<String, AliasEntry>,
        handles: &BTreeMap<String, StoreHandles>,
        observers: &Observers,
    ) -> KvResult<SessionEntry> {
        let (Some(entry), Some(stores), Ok(cache_settings)) = (
            aliases.get(&sessions.alias),
            handles.get(&sessions.alias),
            settings.cache(&sessions.alias),
        ) else {
            return Err(KvError::configuration(format!(
                "session alias '{}' is not a configured cache",
                sessions.alias
            )));
        };
        let config = sessions.session_config();

        let (cache, async_cache) = match sessions.engine {
            SessionEngine::Cache => (entry.cache.clone(), entry.async_cache.clone()),
            SessionEngine::Encrypted => {
                let mut chain = chain_for(cache_settings, &settings.security)?;
                chain.push(Arc::new(EncryptionWrapper::resolve(
                    sessions.encryption_key.as_deref(),
                    &settings.security,
                )?));
                stores.caches(&sessions.alias, cache_settings, &chain, &observers.cache)?
            }
        };

        let mut opened = SessionEntry::default();
        if let Some(cache) = cache {
            opened.blocking = Some(Arc::new(SessionStore::with_hook(
                cache,
                config.clone(),
                observers.sessions.clone(),
            )?));
        }
        if let Some(cache) = async_cache {
            opened.asynchronous = Some(Arc::new(AsyncSessionStore::with_hook(
                cache,
                config,
                observers.sessions.clone(),
            )?));
        }
        debug!(alias = %sessions.alias, engine = ?sessions.engine, "Session store opened");
        Ok(opened)
    }

    fn entry(&self, alias: &str) -> KvResult<&AliasEntry> {
        self.aliases
            .get(alias)
            .ok_or_else(|| KvError::configuration(format!("no cache alias '{}' is configured", alias)))
    }

    /// Blocking cache for `alias`.
    pub fn cache(&self, alias: &str) -> KvResult<Arc<Cache>> {
        self.entry(alias)?.cache.clone().ok_or_else(|| {
            KvError::configuration(format!("cache alias '{}' is not opened in blocking mode", alias))
        })
    }

    /// Async cache for `alias`.
    pub fn async_cache(&self, alias: &str) -> KvResult<Arc<AsyncCache>> {
        self.entry(alias)?.async_cache.clone().ok_or_else(|| {
            KvError::configuration(format!("cache alias '{}' is not opened in async mode", alias))
        })
    }

    pub fn backend(&self, alias: &str) -> KvResult<BackendKind> {
        Ok(self.entry(alias)?.backend)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    fn session_entry(&self) -> KvResult<&SessionEntry> {
        self.sessions
            .as_ref()
            .ok_or_else(|| KvError::configuration("sessions are not enabled"))
    }

    pub fn session_store(&self) -> KvResult<Arc<SessionStore>> {
        self.session_entry()?
            .blocking
            .clone()
            .ok_or_else(|| KvError::configuration("session alias is not opened in blocking mode"))
    }

    pub fn async_session_store(&self) -> KvResult<Arc<AsyncSessionStore>> {
        self.session_entry()?
            .asynchronous
            .clone()
            .ok_or_else(|| KvError::configuration("session alias is not opened in async mode"))
    }

    /// Counters shared by every instrumented cache and session store.
    pub fn metrics(&self) -> Option<Arc<MetricsInstrumentation>> {
        self.metrics.clone()
    }

    /// Flush buffered writes of every alias. Families of one alias share a
    /// store, so each store is flushed once.
    pub async fn close(&self) -> KvResult<()> {
        for (alias, entry) in &self.aliases {
            match (&entry.async_cache, &entry.cache) {
                (Some(cache), _) => cache.flush().await?,
                (None, Some(cache)) => cache.flush()?,
                (None, None) => {}
            }
            debug!(alias = %alias, "Cache alias flushed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for KvContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvContext")
            .field("aliases", &self.aliases.keys().collect::<Vec<_>>())
            .field("sessions", &self.sessions.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
