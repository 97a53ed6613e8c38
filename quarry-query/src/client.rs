//! Client wiring: engine, store and configuration.

use std::sync::Arc;

use quarry_core::{
    ConfigError, PreconditionError, QuarryConfig, QuarryResult, QueryEngine, Resource,
};
use quarry_storage::{
    CacheAsideExecutor, CacheCounters, CacheStats, InvalidationCoordinator, InvalidationReport,
    KeyValueStore, NamespaceVersionStore,
};

use crate::builder::QueryBuilder;

/// Entry point: holds the query engine, the optional key-value store and the
/// configuration every builder created from it shares.
///
/// A client without a store runs uncached queries only; caching and
/// invalidation return [`PreconditionError`] on first use.
///
/// # Example
///
/// ```ignore
/// let quarry = Quarry::new(engine).with_store(Arc::new(InMemoryKvStore::new()));
/// let users = Resource::new("User").shared();
///
/// let rows = quarry
///     .query(&users)
///     .select(&["id", "name"])
///     .filter_eq("status", "active")
///     .cache_for(60)?
///     .fetch_many()
///     .await?;
///
/// quarry.invalidate::<&str>("User", &[]).await?;
/// ```
#[derive(Clone)]
pub struct Quarry {
    engine: Arc<dyn QueryEngine>,
    store: Option<Arc<dyn KeyValueStore>>,
    config: QuarryConfig,
    counters: Arc<CacheCounters>,
    executor: Arc<CacheAsideExecutor>,
    invalidation: Option<InvalidationCoordinator>,
}

impl Quarry {
    /// Create a client with the default configuration and no store.
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self::wire(
            engine,
            None,
            QuarryConfig::default(),
            Arc::new(CacheCounters::new()),
        )
    }

    /// Attach the key-value store for cache entries and version counters.
    pub fn with_store(self, store: Arc<dyn KeyValueStore>) -> Self {
        Self::wire(self.engine, Some(store), self.config, self.counters)
    }

    /// Replace the configuration after validating it.
    pub fn with_config(self, config: QuarryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::wire(self.engine, self.store, config, self.counters))
    }

    fn wire(
        engine: Arc<dyn QueryEngine>,
        store: Option<Arc<dyn KeyValueStore>>,
        config: QuarryConfig,
        counters: Arc<CacheCounters>,
    ) -> Self {
        let mut executor =
            CacheAsideExecutor::new(engine.clone(), config.clone()).with_counters(counters.clone());
        let mut invalidation = None;

        if let Some(store) = &store {
            executor = executor.with_store(store.clone());
            let versions = NamespaceVersionStore::new(store.clone(), &config.version_key_prefix);
            invalidation = Some(
                InvalidationCoordinator::new(versions)
                    .with_counters(counters.clone())
                    .with_logging(config.logging),
            );
        }

        Self {
            engine,
            store,
            config,
            counters,
            executor: Arc::new(executor),
            invalidation,
        }
    }

    /// Start a query against `resource`.
    pub fn query(&self, resource: &Arc<Resource>) -> QueryBuilder {
        QueryBuilder::new(self.executor.clone(), resource.clone())
    }

    /// Bump the version of `resource`, then of each dependent, in order.
    ///
    /// Every entry cached for those resources becomes unreachable. A failed
    /// bump stops the sequence and is returned as
    /// [`QuarryError::Invalidation`](quarry_core::QuarryError::Invalidation).
    pub async fn invalidate<S: AsRef<str>>(
        &self,
        resource: &str,
        dependents: &[S],
    ) -> QuarryResult<InvalidationReport> {
        let coordinator = self
            .invalidation
            .as_ref()
            .ok_or_else(|| PreconditionError::StoreNotConfigured {
                operation: "invalidate".to_string(),
            })?;
        Ok(coordinator.invalidate(resource, dependents).await?)
    }

    /// Current namespace version of `resource` (initialized to 1 if unseen).
    pub async fn version(&self, resource: &str) -> QuarryResult<u64> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| PreconditionError::StoreNotConfigured {
                operation: "version".to_string(),
            })?;
        let versions = NamespaceVersionStore::new(store.clone(), &self.config.version_key_prefix);
        Ok(versions.get_version(resource).await?)
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Counters accumulated by every builder and invalidation of this client.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for Quarry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quarry")
            .field("has_store", &self.has_store())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
