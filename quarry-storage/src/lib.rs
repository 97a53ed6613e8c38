//! Quarry Storage - Key-Value Stores and the Versioned Cache
//!
//! Defines the key-value store boundary with in-memory and LMDB backends,
//! and the cache layer built over it: namespace versions, cache key
//! derivation, cache-aside execution and invalidation.

pub mod cache;
pub mod kv;

pub use cache::{
    CacheAsideExecutor, CacheCounters, CacheEventKind, CacheKey, CacheKeyDeriver, CachePolicy,
    CacheStats, InvalidationCoordinator, InvalidationReport, NamespaceVersionStore,
    CACHE_TARGET, INITIAL_VERSION,
};
pub use kv::{InMemoryKvStore, KeyValueStore, LmdbKvStore, LmdbStoreError};
