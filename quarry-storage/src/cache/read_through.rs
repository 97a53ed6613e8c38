//! Cache-aside read execution.
//!
//! Reads with a TTL go through the store first: a hit short-circuits the
//! query engine, a miss executes and writes the result back with the TTL.
//! Reads without a TTL never touch the store.
//!
//! Store problems never fail a read. A failed lookup (or version lookup, or
//! an undecodable entry) is a miss; a failed write is logged and swallowed.
//! Engine errors always propagate unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use quarry_core::{
    EngineError, ExecutionOverrides, OperationKind, PreconditionError, QuarryConfig,
    QuarryResult, QueryDescriptor, QueryEngine, Row,
};
use serde::{de::DeserializeOwned, Serialize};

use super::cache_key::{CacheKey, CacheKeyDeriver};
use super::events::{log_read_event, CacheEventKind};
use super::stats::{CacheCounters, CacheStats};
use super::version::NamespaceVersionStore;
use crate::kv::KeyValueStore;

/// Per-query caching policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Entry lifetime; `None` bypasses the cache entirely.
    pub ttl: Option<Duration>,
    /// Per-query logging flag, layered over the global one.
    pub logging: Option<bool>,
}

impl CachePolicy {
    /// Never cache.
    pub fn bypass() -> Self {
        Self::default()
    }

    /// Cache for `ttl`.
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            logging: None,
        }
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = Some(enabled);
        self
    }

    pub fn is_cached(&self) -> bool {
        self.ttl.is_some()
    }
}

/// Store handle plus the key deriver built over it.
#[derive(Clone)]
struct CacheLayer {
    store: Arc<dyn KeyValueStore>,
    keys: CacheKeyDeriver,
}

/// Runs reads against a [`QueryEngine`] with an optional cache in front.
#[derive(Clone)]
pub struct CacheAsideExecutor {
    engine: Arc<dyn QueryEngine>,
    cache: Option<CacheLayer>,
    config: QuarryConfig,
    counters: Arc<CacheCounters>,
}

impl CacheAsideExecutor {
    /// Create an executor without a store. Uncached reads work; cached
    /// reads fail with a precondition error until a store is attached.
    pub fn new(engine: Arc<dyn QueryEngine>, config: QuarryConfig) -> Self {
        Self {
            engine,
            cache: None,
            config,
            counters: Arc::new(CacheCounters::new()),
        }
    }

    /// Attach the key-value store used for entries and version counters.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        let versions = NamespaceVersionStore::new(store.clone(), &self.config.version_key_prefix);
        let keys = CacheKeyDeriver::new(versions, &self.config.cache_key_prefix);
        self.cache = Some(CacheLayer { store, keys });
        self
    }

    /// Share counters with another component (e.g. the invalidation
    /// coordinator).
    pub fn with_counters(mut self, counters: Arc<CacheCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }

    pub fn has_store(&self) -> bool {
        self.cache.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Derive the key a read would use, applying `overrides` first.
    pub async fn cache_key(
        &self,
        resource: &str,
        operation: OperationKind,
        descriptor: &QueryDescriptor,
        overrides: &ExecutionOverrides,
    ) -> QuarryResult<CacheKey> {
        let cache = self.require_cache("cache key derivation")?;
        let effective = descriptor.with_overrides(overrides);
        Ok(cache.keys.derive_key(resource, operation, &effective).await?)
    }

    /// Fetch zero or more rows.
    pub async fn fetch_many(
        &self,
        resource: &str,
        descriptor: &QueryDescriptor,
        policy: &CachePolicy,
        overrides: &ExecutionOverrides,
    ) -> QuarryResult<Vec<Row>> {
        let effective = descriptor.with_overrides(overrides);
        let engine = &self.engine;
        self.read_through(
            resource,
            OperationKind::FetchMany,
            &effective,
            policy,
            overrides.logging,
            || engine.fetch_many(resource, &effective),
        )
        .await
    }

    /// Fetch zero or one row. An absent row is cached like any other result.
    pub async fn fetch_one(
        &self,
        resource: &str,
        descriptor: &QueryDescriptor,
        policy: &CachePolicy,
        overrides: &ExecutionOverrides,
    ) -> QuarryResult<Option<Row>> {
        let effective = descriptor.with_overrides(overrides);
        let engine = &self.engine;
        self.read_through(
            resource,
            OperationKind::FetchOne,
            &effective,
            policy,
            overrides.logging,
            || engine.fetch_one(resource, &effective),
        )
        .await
    }

    fn require_cache(&self, operation: &str) -> Result<&CacheLayer, PreconditionError> {
        self.cache
            .as_ref()
            .ok_or_else(|| PreconditionError::StoreNotConfigured {
                operation: operation.to_string(),
            })
    }

    async fn read_through<T, F, Fut>(
        &self,
        resource: &str,
        operation: OperationKind,
        effective: &QueryDescriptor,
        policy: &CachePolicy,
        call_logging: Option<bool>,
        fetch: F,
    ) -> QuarryResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let Some(ttl) = policy.ttl else {
            return Ok(fetch().await?);
        };
        let cache = self.require_cache("cached read")?;
        let logging = self.config.logging_for(policy.logging, call_logging);

        let key = match cache.keys.derive_key(resource, operation, effective).await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    resource = %resource,
                    "Version lookup failed, reading without cache"
                );
                self.counters.record_read_failure();
                self.counters.record_miss();
                return Ok(fetch().await?);
            }
        };

        if let Some(value) = self.lookup::<T>(cache, &key).await {
            self.counters.record_hit();
            log_read_event(logging, CacheEventKind::Hit, resource, operation, key.as_str());
            return Ok(value);
        }

        self.counters.record_miss();
        log_read_event(logging, CacheEventKind::Miss, resource, operation, key.as_str());

        let value = fetch().await?;
        self.populate(cache, &key, &value, ttl, logging).await;
        Ok(value)
    }

    /// Look `key` up, degrading every failure to `None`.
    async fn lookup<T: DeserializeOwned>(&self, cache: &CacheLayer, key: &CacheKey) -> Option<T> {
        let bytes = match cache.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, treating as miss");
                self.counters.record_read_failure();
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Undecodable cache entry, treating as miss");
                self.counters.record_read_failure();
                None
            }
        }
    }

    /// Write `value` under `key`. Failures are logged and swallowed.
    async fn populate<T: Serialize>(
        &self,
        cache: &CacheLayer,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
        logging: bool,
    ) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Failed to serialize result for cache");
                self.counters.record_write_failure();
                return;
            }
        };

        match cache.store.set_with_expiry(key.as_str(), bytes, ttl).await {
            Ok(()) => {
                self.counters.record_write();
                log_read_event(
                    logging,
                    CacheEventKind::Write,
                    key.resource(),
                    key.operation(),
                    key.as_str(),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache write failed, result still returned");
                self.counters.record_write_failure();
            }
        }
    }
}

impl std::fmt::Debug for CacheAsideExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAsideExecutor")
            .field("has_store", &self.has_store())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use async_trait::async_trait;
    use quarry_core::{QuarryError, StoreError};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Parses one ULP off without exact float round-tripping.
    const HARD_FLOAT: f64 = 1.0715660391465826e-75;

    /// Engine returning one row per call and counting invocations.
    #[derive(Default)]
    struct CountingEngine {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingEngine {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryEngine for CountingEngine {
        async fn fetch_many(
            &self,
            resource: &str,
            query: &QueryDescriptor,
        ) -> Result<Vec<Row>, EngineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::Connection {
                    reason: "refused".to_string(),
                });
            }
            let mut row = Row::new();
            row.insert("resource".into(), json!(resource));
            row.insert("call".into(), json!(n));
            row.insert("limit".into(), json!(query.limit));
            row.insert("score".into(), json!(HARD_FLOAT));
            Ok(vec![row])
        }

        async fn fetch_one(
            &self,
            _resource: &str,
            query: &QueryDescriptor,
        ) -> Result<Option<Row>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.filters.contains_key("missing") {
                return Ok(None);
            }
            let mut row = Row::new();
            row.insert("id".into(), json!(1));
            Ok(Some(row))
        }
    }

    /// Store whose every operation fails.
    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::unavailable("down"))
        }
        async fn set(&self, _key: &str, _value: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::unavailable("down"))
        }
        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::unavailable("down"))
        }
        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::unavailable("down"))
        }
    }

    fn executor(engine: Arc<CountingEngine>) -> (CacheAsideExecutor, Arc<InMemoryKvStore>) {
        let store = Arc::new(InMemoryKvStore::new());
        let exec = CacheAsideExecutor::new(engine, QuarryConfig::default()).with_store(store.clone());
        (exec, store)
    }

    fn cached() -> CachePolicy {
        CachePolicy::ttl(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_no_ttl_bypasses_store() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, store) = executor(engine.clone());
        let descriptor = QueryDescriptor::new();
        let none = ExecutionOverrides::new();

        exec.fetch_many("User", &descriptor, &CachePolicy::bypass(), &none).await.unwrap();
        exec.fetch_many("User", &descriptor, &CachePolicy::bypass(), &none).await.unwrap();

        assert_eq!(engine.calls(), 2);
        assert!(store.is_empty().await);
        assert_eq!(exec.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_no_ttl_works_without_store() {
        let engine = Arc::new(CountingEngine::default());
        let exec = CacheAsideExecutor::new(engine.clone(), QuarryConfig::default());
        let rows = exec
            .fetch_many("User", &QueryDescriptor::new(), &CachePolicy::bypass(), &ExecutionOverrides::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_hit_skips_engine() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, _store) = executor(engine.clone());
        let descriptor = QueryDescriptor::new();
        let none = ExecutionOverrides::new();

        let first = exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        let second = exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.calls(), 1);
        let stats = exec.stats();
        assert_eq!((stats.hits, stats.misses, stats.writes), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_hit_preserves_float_bits() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, _store) = executor(engine.clone());
        let descriptor = QueryDescriptor::new();
        let none = ExecutionOverrides::new();

        let first = exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        let second = exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();

        assert_eq!(engine.calls(), 1);
        assert_eq!(first, second);
        let score = second[0]["score"].as_f64().unwrap();
        assert_eq!(score.to_bits(), HARD_FLOAT.to_bits());
    }

    #[tokio::test]
    async fn test_overrides_get_their_own_key() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, _store) = executor(engine.clone());
        let descriptor = QueryDescriptor::new();

        let plain = exec
            .fetch_many("User", &descriptor, &cached(), &ExecutionOverrides::new())
            .await
            .unwrap();
        let limited = exec
            .fetch_many("User", &descriptor, &cached(), &ExecutionOverrides::new().with_limit(5))
            .await
            .unwrap();

        assert_eq!(engine.calls(), 2);
        assert_eq!(plain[0]["limit"], json!(null));
        assert_eq!(limited[0]["limit"], json!(5));
    }

    #[tokio::test]
    async fn test_fetch_one_caches_absent_row() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, _store) = executor(engine.clone());
        let mut descriptor = QueryDescriptor::new();
        descriptor.merge_filters([("missing", true)]);
        let none = ExecutionOverrides::new();

        assert_eq!(exec.fetch_one("User", &descriptor, &cached(), &none).await.unwrap(), None);
        assert_eq!(exec.fetch_one("User", &descriptor, &cached(), &none).await.unwrap(), None);
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_many_and_fetch_one_do_not_share_entries() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, _store) = executor(engine.clone());
        let descriptor = QueryDescriptor::new();
        let none = ExecutionOverrides::new();

        exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        let one = exec.fetch_one("User", &descriptor, &cached(), &none).await.unwrap();
        assert!(one.is_some());
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_store_down_degrades_to_engine() {
        let engine = Arc::new(CountingEngine::default());
        let exec = CacheAsideExecutor::new(engine.clone(), QuarryConfig::default())
            .with_store(Arc::new(DownStore));
        let descriptor = QueryDescriptor::new();
        let none = ExecutionOverrides::new();

        let rows = exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        assert_eq!(rows.len(), 1);
        exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        assert_eq!(engine.calls(), 2);
        assert_eq!(exec.stats().read_failures, 2);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, store) = executor(engine.clone());
        let descriptor = QueryDescriptor::new();
        let none = ExecutionOverrides::new();

        let key = exec
            .cache_key("User", OperationKind::FetchMany, &descriptor, &none)
            .await
            .unwrap();
        store.set(key.as_str(), b"{not json".to_vec()).await.unwrap();

        let rows = exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(engine.calls(), 1);
        assert_eq!(exec.stats().read_failures, 1);

        // The fresh result replaced the bad entry
        exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_propagates_and_is_not_cached() {
        let engine = Arc::new(CountingEngine::default());
        engine.fail.store(true, Ordering::SeqCst);
        let (exec, store) = executor(engine.clone());

        let err = exec
            .fetch_many("User", &QueryDescriptor::new(), &cached(), &ExecutionOverrides::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::Engine(EngineError::Connection { .. })));
        assert!(store.keys_with_prefix("quarry:cache:").await.is_empty());
    }

    #[tokio::test]
    async fn test_cached_read_without_store_is_precondition_error() {
        let engine = Arc::new(CountingEngine::default());
        let exec = CacheAsideExecutor::new(engine.clone(), QuarryConfig::default());

        let err = exec
            .fetch_many("User", &QueryDescriptor::new(), &cached(), &ExecutionOverrides::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::Precondition(_)));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_version_bump_orphans_entries() {
        let engine = Arc::new(CountingEngine::default());
        let (exec, store) = executor(engine.clone());
        let descriptor = QueryDescriptor::new();
        let none = ExecutionOverrides::new();

        exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();
        store.increment("quarry:ns:User").await.unwrap();
        exec.fetch_many("User", &descriptor, &cached(), &none).await.unwrap();

        assert_eq!(engine.calls(), 2);
        // The old entry is orphaned, not deleted
        assert_eq!(store.keys_with_prefix("quarry:cache:User:").await.len(), 2);
    }
}
