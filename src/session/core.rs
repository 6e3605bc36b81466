use std::time::{Duration, Instant};

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};
use crate::instrument::{Hook, Operation, OperationEvent, Outcome};

use super::record::{Session, SessionRecord, SessionState, is_valid_key};

/// Cache key prefix for session records.
pub const DEFAULT_KEY_PREFIX: &str = "django.contrib.sessions.cache";

/// Two weeks.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(1_209_600);

/// Attempts at finding an unused key before `save` gives up.
pub(crate) const CREATE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    /// Every save pushes the expiry to now + max age.
    #[default]
    Sliding,
    /// The expiry set by the first save is kept for the session's lifetime.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub key_prefix: String,
    pub max_age: Duration,
    pub expiry: ExpiryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_age: DEFAULT_MAX_AGE,
            expiry: ExpiryPolicy::Sliding,
        }
    }
}

/// What a save should do with the record.
pub(crate) enum SavePlan {
    Write { expire_at: Timestamp, ttl: Duration },
    /// A fixed expiry has already passed; the record must go.
    Expired,
}

pub(crate) struct SessionCore {
    config: SessionConfig,
    hook: Hook,
    backend: String,
    namespace: String,
}

impl SessionCore {
    pub fn new(config: SessionConfig, hook: Hook, backend: &str, namespace: &str) -> KvResult<Self> {
        if config.max_age.as_secs() == 0 {
            return Err(KvError::configuration(
                "session max_age must be at least one second",
            ));
        }
        Ok(Self {
            config,
            hook,
            backend: backend.to_string(),
            namespace: namespace.to_string(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Logical cache key for a session key, or `None` when the key could not
    /// have been issued by this store.
    pub fn cache_key(&self, session_key: &str) -> Option<String> {
        is_valid_key(session_key).then(|| format!("{}{}", self.config.key_prefix, session_key))
    }

    /// Turn a cache read into a session. Expired records read as absent.
    pub fn loaded(&self, session_key: &str, record: Option<SessionRecord>) -> Session {
        match record {
            Some(record) if !record.is_expired(Timestamp::now()) => {
                Session::loaded(session_key.to_string(), record)
            }
            _ => Session::new(),
        }
    }

    pub fn plan_save(&self, session: &Session) -> KvResult<SavePlan> {
        let now = Timestamp::now();
        let expire_at = match (self.config.expiry, session.expire_at) {
            (ExpiryPolicy::Fixed, Some(fixed)) => fixed,
            _ => now
                .checked_add(SignedDuration::from_secs(self.config.max_age.as_secs() as i64))
                .map_err(|e| KvError::invalid(format!("session expiry out of range: {}", e)))?,
        };
        let remaining = expire_at.duration_since(now);
        if remaining <= SignedDuration::ZERO {
            return Ok(SavePlan::Expired);
        }
        let ttl = Duration::try_from(remaining)
            .map_err(|e| KvError::invalid(format!("session expiry out of range: {}", e)))?;
        Ok(SavePlan::Write { expire_at, ttl })
    }

    pub fn mark_saved(session: &mut Session, key: String, expire_at: Timestamp) {
        session.key = Some(key);
        session.expire_at = Some(expire_at);
        session.state = SessionState::Loaded;
        session.modified = false;
    }

    pub fn begin<'a>(&'a self, operation: Operation, key: Option<&'a str>) -> SessionScope<'a> {
        self.hook.start(operation, &self.backend, key);
        SessionScope {
            core: self,
            operation,
            key,
            started: Instant::now(),
        }
    }
}

pub(crate) struct SessionScope<'a> {
    core: &'a SessionCore,
    operation: Operation,
    key: Option<&'a str>,
    started: Instant,
}

impl SessionScope<'_> {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::record::{SessionData, generate_key};

    fn core(expiry: ExpiryPolicy) -> SessionCore {
        SessionCore::new(
            SessionConfig {
                expiry,
                ..SessionConfig::default()
            },
            Hook::none(),
            "memory",
            "sessions",
        )
        .unwrap()
    }

    #[test]
    fn test_cache_key_uses_prefix_and_rejects_malformed() {
        let core = core(ExpiryPolicy::Sliding);
        let key = generate_key();
        assert_eq!(
            core.cache_key(&key).unwrap(),
            format!("{}{}", DEFAULT_KEY_PREFIX, key)
        );
        assert!(core.cache_key("../../etc").is_none());
    }

    #[test]
    fn test_expired_record_loads_absent() {
        let core = core(ExpiryPolicy::Sliding);
        let stale = SessionRecord {
            data: SessionData::from([("a".to_string(), serde_json::json!(1))]),
            expire_at: Timestamp::now() - SignedDuration::from_secs(5),
        };
        let session = core.loaded("abcdefgh", Some(stale));
        assert_eq!(session.state(), SessionState::Absent);
        assert!(session.key().is_none());
        assert!(session.is_empty());
    }

    #[test]
    fn test_sliding_and_fixed_plans() {
        let sliding = core(ExpiryPolicy::Sliding);
        let mut session = Session::new();
        session.expire_at = Some(Timestamp::now() + SignedDuration::from_secs(10));
        match sliding.plan_save(&session).unwrap() {
            SavePlan::Write { ttl, .. } => assert!(ttl > Duration::from_secs(1_000_000)),
            SavePlan::Expired => panic!("sliding sessions never expire on save"),
        }

        let fixed = core(ExpiryPolicy::Fixed);
        match fixed.plan_save(&session).unwrap() {
            SavePlan::Write { ttl, .. } => assert!(ttl <= Duration::from_secs(10)),
            SavePlan::Expired => panic!("fixed expiry is still in the future"),
        }

        session.expire_at = Some(Timestamp::now() - SignedDuration::from_secs(1));
        assert!(matches!(fixed.plan_save(&session).unwrap(), SavePlan::Expired));
    }

    #[test]
    fn test_zero_max_age_rejected() {
        let config = SessionConfig {
            max_age: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(matches!(
            SessionCore::new(config, Hook::none(), "memory", "ns"),
            Err(KvError::Configuration(_))
        ));
    }
}
