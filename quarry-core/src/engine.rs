//! Query engine boundary
//!
//! Quarry never executes SQL itself. The relational layer is reached through
//! [`QueryEngine`], which receives the resource name and a fully-built
//! [`QueryDescriptor`].

use async_trait::async_trait;

use crate::descriptor::{QueryDescriptor, Row};
use crate::error::EngineError;

/// Executor for structured read queries.
///
/// Implementations should be thread-safe; a single engine is shared by every
/// builder created from a client.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute and return zero or more rows.
    async fn fetch_many(
        &self,
        resource: &str,
        query: &QueryDescriptor,
    ) -> Result<Vec<Row>, EngineError>;

    /// Execute and return at most one row.
    async fn fetch_one(
        &self,
        resource: &str,
        query: &QueryDescriptor,
    ) -> Result<Option<Row>, EngineError>;
}
