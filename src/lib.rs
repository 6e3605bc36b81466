//! kvcache
//!
//! One cache contract over memory, disk and redis stores, with blocking and
//! async front ends, session storage, byte-level wrappers (compression,
//! encryption) and optional instrumentation.
//!
//! Most programs load [`config::Settings`] and build a [`KvContext`] once at
//! startup; the pieces underneath are public for direct use as well.

use shadow_rs::shadow;
shadow!(build);

pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod instrument;
pub mod logger;
pub mod session;
pub mod store;
pub mod wrappers;

pub use cache::{AsyncCache, Cache, CacheBuilder, CacheKey, Expiry};
pub use context::KvContext;
pub use error::{ErrorKind, KvError, KvResult};

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
