//! Session data as seen by callers and as persisted in the cache.

use std::collections::BTreeMap;

use jiff::Timestamp;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KvError, KvResult};

pub type SessionData = BTreeMap<String, Value>;

/// Length of generated session keys.
pub const SESSION_KEY_LENGTH: usize = 32;

const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Shortest key accepted from a caller; anything shorter is never looked up.
const MIN_KEY_LENGTH: usize = 8;

pub fn generate_key() -> String {
    let mut rng = rand::rng();
    (0..SESSION_KEY_LENGTH)
        .map(|_| KEY_ALPHABET[rng.random_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}

/// Whether `key` could have been issued by [`generate_key`].
pub fn is_valid_key(key: &str) -> bool {
    (MIN_KEY_LENGTH..=SESSION_KEY_LENGTH).contains(&key.len())
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// What is stored under a session key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub data: SessionData,
    pub expire_at: Timestamp,
}

impl SessionRecord {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expire_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not backed by a stored record (new, missing, expired or flushed).
    Absent,
    /// Read from or written to the store.
    Loaded,
}

/// A session handle. Obtained from `load`, mutated by the caller and handed
/// back to `save`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub(crate) key: Option<String>,
    pub(crate) data: SessionData,
    pub(crate) state: SessionState,
    pub(crate) expire_at: Option<Timestamp>,
    pub(crate) modified: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            key: None,
            data: SessionData::new(),
            state: SessionState::Absent,
            expire_at: None,
            modified: false,
        }
    }

    pub(crate) fn loaded(key: String, record: SessionRecord) -> Self {
        Self {
            key: Some(key),
            data: record.data,
            state: SessionState::Loaded,
            expire_at: Some(record.expire_at),
            modified: false,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn expire_at(&self) -> Option<Timestamp> {
        self.expire_at
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Typed read; `None` when absent or of another shape.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.data
            .get(name)
            .and_then(|v| T::deserialize(v).ok())
    }

    pub fn insert<T: Serialize + ?Sized>(&mut self, name: impl Into<String>, value: &T) -> KvResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| KvError::invalid(format!("session value is not JSON: {}", e)))?;
        self.data.insert(name.into(), value);
        self.modified = true;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let removed = self.data.remove(name);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.data.is_empty() {
            self.modified = true;
        }
        self.data.clear();
    }

    pub(crate) fn record(&self, expire_at: Timestamp) -> SessionRecord {
        SessionRecord {
            data: self.data.clone(),
            expire_at,
        }
    }
}
