//! Quarry - Fluent Queries with Versioned Caching
//!
//! Build read queries fluently over any [`QueryEngine`], and cache their
//! results in a [`KeyValueStore`] under keys derived from the query shape and
//! a per-resource namespace version. Writes elsewhere in the application
//! call [`Quarry::invalidate`], which bumps versions instead of deleting
//! entries.
//!
//! ```ignore
//! let quarry = Quarry::new(engine).with_store(store);
//! let users = Resource::new("User").shared();
//!
//! let active = quarry
//!     .query(&users)
//!     .select(&["id", "name"])
//!     .filter_eq("status", "active")
//!     .cache_for(60)?;
//!
//! let rows = active.fetch_many().await?; // miss, engine runs
//! let rows = active.fetch_many().await?; // hit
//! quarry.invalidate::<&str>("User", &[]).await?;
//! let rows = active.fetch_many().await?; // miss again
//! ```

pub mod builder;
pub mod client;
pub mod telemetry;

pub use builder::QueryBuilder;
pub use client::Quarry;
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError, DEFAULT_LOG_FILTER};

pub use quarry_core::{
    ComputedExpr, ConfigError, Constraint, EngineError, ExecutionOverrides, FilterOperator,
    InvalidationError, OperationKind, PreconditionError, QuarryConfig, QuarryError, QuarryResult,
    QueryDescriptor, QueryEngine, RelationSpec, Resource, Row, SortDirection, SortKey, StoreError,
    VirtualFieldRegistry,
};
pub use quarry_storage::{
    CacheKey, CacheStats, InMemoryKvStore, InvalidationReport, KeyValueStore, LmdbKvStore,
    CACHE_TARGET,
};
pub use serde_json::{json, Value};
