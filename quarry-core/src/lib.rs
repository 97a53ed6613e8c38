//! Quarry Core - Query Types
//!
//! Pure data structures shared by the cache layer and the query builder:
//! query descriptors, filter constraints, virtual-field registries,
//! configuration and errors. The only behavior here is accumulation and
//! validation; nothing in this crate touches a store or an engine.

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod filter;
pub mod registry;

pub use config::{QuarryConfig, DEFAULT_CACHE_KEY_PREFIX, DEFAULT_VERSION_KEY_PREFIX};
pub use descriptor::{
    ExecutionOverrides, OperationKind, Pagination, Projection, QueryDescriptor, RelationSpec,
    Row, SortDirection, SortKey, VirtualProjection,
};
pub use engine::QueryEngine;
pub use error::{
    ConfigError, EngineError, InvalidationError, PreconditionError, QuarryError, QuarryResult,
    StoreError,
};
pub use filter::{merge_filters, Constraint, FilterMap, FilterOperator};
pub use registry::{ComputedExpr, Resource, VirtualFieldRegistry};
