//! Cache backends.
//!
//! [`Cache`] and [`AsyncCache`] expose the same operations; both delegate
//! key handling, value coding and instrumentation to a shared core and only
//! differ in how they call the store.

mod asynchronous;
mod blocking;
mod core;

pub use asynchronous::AsyncCache;
pub use blocking::Cache;
pub use self::core::{CacheBuilder, CacheKey, Expiry};
