//! Physical stores behind the cache and session layers.
//!
//! Every store speaks the protocol in [`traits`]:
//! - Memory store (in-process, bounded LRU)
//! - Disk store (persistent, sled via `cached`)
//! - Redis store (networked; pooled async and single-connection blocking)
//!
//! Keys handed to a store are already physical keys from
//! [`crate::codec::key`]; values are opaque bytes.

mod disk;
mod memory;
mod redis;
mod traits;

pub use disk::{DiskStore, DiskStoreConfig};
pub use memory::MemoryStore;
pub use redis::{BlockingRedisStore, RedisOptions, RedisStore, RedisStoreConfig};
pub use traits::{
    AddAtomicity, AsyncStore, BatchOutcome, BlockingStore, Concurrency, StoreCapabilities,
    check_ttl,
};
