//! Physical key construction.
//!
//! A physical key is `esc(namespace) ":" version ":" esc(key)`. `esc` prefixes
//! every `\` and `:` with a backslash, so the two unescaped colons are the
//! only separators and distinct triples can never produce the same key.

use std::borrow::Cow;

use crate::error::{KvError, KvResult};

/// Separator between the three key components.
pub const SEPARATOR: char = ':';

const ESCAPE: char = '\\';

/// Upper bound on the logical key length, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// A physical key split back into its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub namespace: String,
    pub version: u32,
    pub key: String,
}

/// Build the physical key for `(namespace, key, version)`.
pub fn encode(namespace: &str, key: &str, version: u32) -> String {
    let namespace = escape(namespace);
    let key = escape(key);
    let mut out = String::with_capacity(namespace.len() + key.len() + 12);
    out.push_str(&namespace);
    out.push(SEPARATOR);
    out.push_str(&version.to_string());
    out.push(SEPARATOR);
    out.push_str(&key);
    out
}

/// Prefix shared by every physical key in `namespace`.
pub fn namespace_prefix(namespace: &str) -> String {
    let mut prefix = escape(namespace).into_owned();
    prefix.push(SEPARATOR);
    prefix
}

/// Reverse [`encode`]. Only used for inspection and debugging.
pub fn decode(physical: &str) -> Option<DecodedKey> {
    let mut parts = Vec::with_capacity(3);
    let mut current = String::new();
    let mut chars = physical.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => current.push(chars.next()?),
            SEPARATOR if parts.len() < 2 => parts.push(std::mem::take(&mut current)),
            SEPARATOR => return None,
            other => current.push(other),
        }
    }
    parts.push(current);

    if parts.len() != 3 {
        return None;
    }
    let key = parts.pop()?;
    let version = parts.pop()?.parse().ok()?;
    let namespace = parts.pop()?;
    Some(DecodedKey {
        namespace,
        version,
        key,
    })
}

/// Reject logical keys no store can hold safely.
pub fn validate(key: &str) -> KvResult<()> {
    if key.is_empty() {
        return Err(KvError::invalid("cache key must not be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(KvError::invalid(format!(
            "cache key is {} bytes, the limit is {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(KvError::invalid(format!(
            "cache key {:?} contains control characters",
            key
        )));
    }
    Ok(())
}

fn escape(component: &str) -> Cow<'_, str> {
    if !component.contains([ESCAPE, SEPARATOR]) {
        return Cow::Borrowed(component);
    }
    let mut out = String::with_capacity(component.len() + 4);
    for c in component.chars() {
        if c == ESCAPE || c == SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    Cow::Owned(out)
}
