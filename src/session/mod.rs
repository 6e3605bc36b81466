//! Session stores layered on the cache backends.
//!
//! A session is a JSON map with an absolute expiry, stored under
//! `key_prefix + session_key` in a cache. The encrypted flavour is the same
//! store over a cache whose wrapper chain ends with an encryption link.

mod asynchronous;
mod blocking;
mod core;
mod record;

pub use asynchronous::AsyncSessionStore;
pub use blocking::SessionStore;
pub use self::core::{DEFAULT_KEY_PREFIX, DEFAULT_MAX_AGE, ExpiryPolicy, SessionConfig};
pub use record::{
    SESSION_KEY_LENGTH, Session, SessionData, SessionRecord, SessionState, generate_key,
    is_valid_key,
};
