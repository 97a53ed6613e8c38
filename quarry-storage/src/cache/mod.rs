//! Versioned read-through cache.
//!
//! # Design
//!
//! Nothing is ever deleted to invalidate. Each resource owns a namespace
//! version ([`NamespaceVersionStore`]) and every [`CacheKey`] embeds the
//! version current at derivation time. [`InvalidationCoordinator`] bumps
//! versions; entries derived under an older version stop being looked up and
//! expire through their TTL.
//!
//! Cache hits are trusted as-is. There is no revalidation beyond the version
//! embedded in the key, and a read that derived its key just before a bump
//! may still return the pre-bump entry.
//!
//! # Example
//!
//! ```ignore
//! let executor = CacheAsideExecutor::new(engine, QuarryConfig::default())
//!     .with_store(store.clone());
//! let rows = executor
//!     .fetch_many("User", &descriptor, &CachePolicy::ttl(Duration::from_secs(60)), &ExecutionOverrides::new())
//!     .await?;
//! ```

pub mod cache_key;
pub mod events;
pub mod invalidation;
pub mod read_through;
pub mod stats;
pub mod version;

pub use cache_key::{CacheKey, CacheKeyDeriver, DIGEST_HEX_LEN};
pub use events::{CacheEventKind, CACHE_TARGET};
pub use invalidation::{InvalidationCoordinator, InvalidationReport};
pub use read_through::{CacheAsideExecutor, CachePolicy};
pub use stats::{CacheCounters, CacheStats};
pub use version::{NamespaceVersionStore, INITIAL_VERSION};
