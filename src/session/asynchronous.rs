use std::sync::Arc;
use std::time::Duration;

use crate::cache::{AsyncCache, Expiry};
use crate::error::{KvError, KvResult};
use crate::instrument::{Hook, Operation, Outcome};

use super::core::{CREATE_ATTEMPTS, SavePlan, SessionConfig, SessionCore};
use super::record::{Session, SessionRecord, SessionState, generate_key};

/// Session store over an [`AsyncCache`]. Same contract as
/// [`SessionStore`](super::SessionStore).
pub struct AsyncSessionStore {
    cache: Arc<AsyncCache>,
    core: SessionCore,
}

impl AsyncSessionStore {
    pub fn new(cache: Arc<AsyncCache>, config: SessionConfig) -> KvResult<Self> {
        Self::with_hook(cache, config, Hook::none())
    }

    pub fn with_hook(cache: Arc<AsyncCache>, config: SessionConfig, hook: Hook) -> KvResult<Self> {
        let core = SessionCore::new(config, hook, cache.backend_name(), cache.namespace())?;
        Ok(Self { cache, core })
    }

    pub fn config(&self) -> &SessionConfig {
        self.core.config()
    }

    pub fn cache(&self) -> &AsyncCache {
        &self.cache
    }

    pub async fn load(&self, session_key: &str) -> KvResult<Session> {
        let scope = self.core.begin(Operation::SessionLoad, Some(session_key));
        let result = match self.core.cache_key(session_key) {
            Some(cache_key) => self
                .cache
                .get::<SessionRecord>(&cache_key)
                .await
                .map(|record| self.core.loaded(session_key, record)),
            None => Ok(Session::new()),
        };
        scope.finish(result, |s| match s.state() {
            SessionState::Loaded => Outcome::Hit,
            SessionState::Absent => Outcome::Miss,
        })
    }

    pub async fn save(&self, session: &mut Session) -> KvResult<()> {
        let event_key = session.key.clone();
        let scope = self.core.begin(Operation::SessionSave, event_key.as_deref());
        let result = self.save_inner(session).await;
        scope.finish(result, |_| Outcome::Success)
    }

    async fn save_inner(&self, session: &mut Session) -> KvResult<()> {
        let (expire_at, ttl) = match self.core.plan_save(session)? {
            SavePlan::Write { expire_at, ttl } => (expire_at, ttl),
            SavePlan::Expired => {
                if let Some(cache_key) = session.key().and_then(|k| self.core.cache_key(k)) {
                    self.cache.delete(&cache_key).await?;
                }
                *session = Session::new();
                return Ok(());
            }
        };
        let record = session.record(expire_at);
        let existing = session
            .key()
            .and_then(|k| self.core.cache_key(k).map(|ck| (k.to_string(), ck)));
        let key = match existing {
            Some((key, cache_key)) => {
                self.cache
                    .set(&cache_key, &record, Expiry::After(ttl))
                    .await?;
                key
            }
            None => self.create(&record, ttl).await?,
        };
        SessionCore::mark_saved(session, key, expire_at);
        Ok(())
    }

    async fn create(&self, record: &SessionRecord, ttl: Duration) -> KvResult<String> {
        for _ in 0..CREATE_ATTEMPTS {
            let key = generate_key();
            let Some(cache_key) = self.core.cache_key(&key) else {
                continue;
            };
            if self.cache.add(&cache_key, record, Expiry::After(ttl)).await? {
                return Ok(key);
            }
        }
        Err(KvError::Operation(
            "unable to allocate an unused session key".to_string(),
        ))
    }

    pub async fn exists(&self, session_key: &str) -> KvResult<bool> {
        let scope = self.core.begin(Operation::SessionExists, Some(session_key));
        let result = match self.core.cache_key(session_key) {
            Some(cache_key) => self.cache.has_key(&cache_key).await,
            None => Ok(false),
        };
        scope.finish(result, |found| if *found { Outcome::Hit } else { Outcome::Miss })
    }

    pub async fn delete(&self, session_key: &str) -> KvResult<bool> {
        let scope = self.core.begin(Operation::SessionDelete, Some(session_key));
        let result = match self.core.cache_key(session_key) {
            Some(cache_key) => self.cache.delete(&cache_key).await,
            None => Ok(false),
        };
        scope.finish(result, |_| Outcome::Success)
    }

    pub async fn cycle_key(&self, session: &mut Session) -> KvResult<()> {
        let old = session.key.take();
        session.state = SessionState::Absent;
        self.save(session).await?;
        if let Some(old) = old {
            self.delete(&old).await?;
        }
        Ok(())
    }

    pub async fn flush(&self, session: &mut Session) -> KvResult<()> {
        if let Some(key) = session.key.take() {
            self.delete(&key).await?;
        }
        *session = Session::new();
        Ok(())
    }
}
