//! Quarry Test Utilities
//!
//! Shared test infrastructure for the Quarry workspace:
//! - A scriptable mock query engine that counts invocations
//! - A key-value store with injectable failures
//! - Proptest generators for descriptors and their parts
//! - Fixtures and custom assertions

pub use quarry_core::{
    ComputedExpr, ConfigError, Constraint, EngineError, FilterOperator, OperationKind,
    Pagination, PreconditionError, Projection, QuarryError, QuarryResult, QueryDescriptor,
    QueryEngine, RelationSpec, Resource, Row, SortDirection, SortKey, StoreError,
    VirtualFieldRegistry,
};
pub use quarry_storage::{InMemoryKvStore, KeyValueStore};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

// ============================================================================
// MOCK QUERY ENGINE
// ============================================================================

/// In-memory query engine with scripted rows.
///
/// Equality filters and limit/offset are applied to the scripted rows; other
/// operators are ignored. Every call is counted, including failed ones.
#[derive(Debug, Default)]
pub struct MockQueryEngine {
    rows: Mutex<HashMap<String, Vec<Row>>>,
    failure: Mutex<Option<EngineError>>,
    last_query: Mutex<Option<(String, QueryDescriptor)>>,
    many_calls: AtomicUsize,
    one_calls: AtomicUsize,
}

impl MockQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the rows returned for `resource`.
    pub fn with_rows(mut self, resource: impl Into<String>, rows: Vec<Row>) -> Self {
        self.rows.get_mut().insert(resource.into(), rows);
        self
    }

    /// Replace the rows of `resource` on a shared engine.
    pub async fn set_rows(&self, resource: impl Into<String>, rows: Vec<Row>) {
        self.rows.lock().await.insert(resource.into(), rows);
    }

    /// Make every following call fail with `error` (or succeed again with
    /// `None`).
    pub async fn set_failure(&self, error: Option<EngineError>) {
        *self.failure.lock().await = error;
    }

    /// Total number of engine invocations.
    pub fn calls(&self) -> usize {
        self.many_calls() + self.one_calls()
    }

    pub fn many_calls(&self) -> usize {
        self.many_calls.load(Ordering::SeqCst)
    }

    pub fn one_calls(&self) -> usize {
        self.one_calls.load(Ordering::SeqCst)
    }

    /// Resource and descriptor of the most recent call.
    pub async fn last_query(&self) -> Option<(String, QueryDescriptor)> {
        self.last_query.lock().await.clone()
    }

    async fn run(&self, resource: &str, query: &QueryDescriptor) -> Result<Vec<Row>, EngineError> {
        *self.last_query.lock().await = Some((resource.to_string(), query.clone()));
        if let Some(error) = self.failure.lock().await.clone() {
            return Err(error);
        }

        let rows = self.rows.lock().await;
        let matching = rows
            .get(resource)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_filters(row, query))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

fn matches_filters(row: &Row, query: &QueryDescriptor) -> bool {
    query.filters.iter().all(|(field, constraint)| match constraint {
        Constraint::Equals(expected) => row.get(field).unwrap_or(&Value::Null) == expected,
        Constraint::Expr { .. } => true,
    })
}

#[async_trait]
impl QueryEngine for MockQueryEngine {
    async fn fetch_many(
        &self,
        resource: &str,
        query: &QueryDescriptor,
    ) -> Result<Vec<Row>, EngineError> {
        self.many_calls.fetch_add(1, Ordering::SeqCst);
        self.run(resource, query).await
    }

    async fn fetch_one(
        &self,
        resource: &str,
        query: &QueryDescriptor,
    ) -> Result<Option<Row>, EngineError> {
        self.one_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.run(resource, query).await?.into_iter().next())
    }
}

// ============================================================================
// FLAKY KEY-VALUE STORE
// ============================================================================

/// [`InMemoryKvStore`] wrapper whose operations can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyKvStore {
    inner: InMemoryKvStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_increments: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `get` (and therefore version lookups).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail `set`, `set_with_expiry`, `set_if_absent` and `delete`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail `increment` (and therefore invalidation).
    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_reads(fail);
        self.fail_writes(fail);
        self.fail_increments(fail);
    }

    /// The wrapped store, bypassing failure injection.
    pub fn inner(&self) -> &InMemoryKvStore {
        &self.inner
    }

    /// Number of `get` calls, failed ones included.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write calls, failed ones included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::unavailable(format!("injected {} failure", op)))
        } else {
            Ok(())
        }
    }

    fn write_attempt(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_writes, "write")
    }
}

#[async_trait]
impl KeyValueStore for FlakyKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_reads, "read")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.write_attempt()?;
        self.inner.set(key, value).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.write_attempt()?;
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.write_attempt()?;
        self.inner.delete(key).await
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StoreError> {
        self.write_attempt()?;
        self.inner.set_if_absent(key, value).await
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        self.check(&self.fail_increments, "increment")?;
        self.inner.increment(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for descriptor parts.

    use super::*;
    use proptest::prelude::*;

    /// Generate a resource name like `User` or `Invoice`.
    pub fn arb_resource_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,10}"
    }

    /// Generate a snake_case field name.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,10}"
    }

    pub fn arb_filter_operator() -> impl Strategy<Value = FilterOperator> {
        prop_oneof![
            Just(FilterOperator::Eq),
            Just(FilterOperator::Ne),
            Just(FilterOperator::Gt),
            Just(FilterOperator::Lt),
            Just(FilterOperator::Gte),
            Just(FilterOperator::Lte),
            Just(FilterOperator::Contains),
            Just(FilterOperator::Like),
            Just(FilterOperator::IsNull),
        ]
    }

    /// Generate a scalar JSON value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z0-9 ]{0,12}".prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    pub fn arb_constraint() -> impl Strategy<Value = Constraint> {
        prop_oneof![
            arb_scalar().prop_map(Constraint::Equals),
            (arb_filter_operator(), arb_scalar()).prop_map(|(op, v)| Constraint::op(op, v)),
            prop::collection::vec(any::<i64>(), 1..5).prop_map(Constraint::one_of),
        ]
    }

    /// Generate filter entries with distinct field names.
    pub fn arb_filter_entries() -> impl Strategy<Value = Vec<(String, Constraint)>> {
        prop::collection::btree_map(arb_field_name(), arb_constraint(), 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    pub fn arb_sort_key() -> impl Strategy<Value = SortKey> {
        (arb_field_name(), any::<bool>()).prop_map(|(field, asc)| {
            if asc {
                SortKey::asc(field)
            } else {
                SortKey::desc(field)
            }
        })
    }

    pub fn arb_relation() -> impl Strategy<Value = RelationSpec> {
        (
            arb_resource_name(),
            prop::option::of(arb_field_name()),
            prop::collection::vec(arb_field_name(), 0..4),
        )
            .prop_map(|(resource, alias, fields)| {
                let spec = RelationSpec::new(resource).with_fields(&fields);
                match alias {
                    Some(alias) => spec.with_alias(alias),
                    None => spec,
                }
            })
    }

    /// Generate a valid `(page, page_size)` pair.
    pub fn arb_page() -> impl Strategy<Value = (u64, u64)> {
        (1u64..500, 1u64..200)
    }

    /// Generate a full descriptor, resolving projections against `registry`.
    pub fn arb_descriptor(registry: VirtualFieldRegistry) -> impl Strategy<Value = QueryDescriptor> {
        let names: Vec<String> = registry.names().map(str::to_string).collect();
        let field = if names.is_empty() {
            arb_field_name().boxed()
        } else {
            prop_oneof![prop::sample::select(names), arb_field_name()].boxed()
        };
        (
            arb_filter_entries(),
            prop::collection::vec(field, 0..6),
            prop::collection::vec(arb_relation(), 0..3),
            prop::collection::vec(arb_sort_key(), 0..3),
            prop::option::of(arb_page()),
        )
            .prop_map(move |(filters, fields, relations, sort, page)| {
                let mut descriptor = QueryDescriptor::new();
                descriptor.merge_filters(filters);
                descriptor.projection = Projection::resolve(&fields, &registry);
                descriptor.relations = relations;
                descriptor.sort = sort;
                if let Some((page, size)) = page {
                    if let Ok(pagination) = Pagination::from_page(page, size) {
                        descriptor.apply_pagination(pagination);
                    }
                }
                descriptor
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built resources and rows.

    use super::*;
    use serde_json::json;

    /// `User` with a `post_count` virtual field.
    pub fn user_resource() -> Resource {
        Resource::new("User").with_virtual_field(
            "post_count",
            ComputedExpr::raw("(SELECT COUNT(*) FROM posts WHERE posts.user_id = users.id)"),
        )
    }

    /// `Post` with a `comment_count` virtual field.
    pub fn post_resource() -> Resource {
        Resource::new("Post").with_virtual_field(
            "comment_count",
            ComputedExpr::raw("(SELECT COUNT(*) FROM comments WHERE comments.post_id = posts.id)"),
        )
    }

    /// Build a row from a JSON object literal. Non-objects yield an empty row.
    pub fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    /// Three users, two of them active.
    pub fn user_rows() -> Vec<Row> {
        vec![
            row(json!({"id": 1, "name": "Ada", "status": "active"})),
            row(json!({"id": 2, "name": "Grace", "status": "active"})),
            row(json!({"id": 3, "name": "Linus", "status": "banned"})),
        ]
    }

    pub fn post_rows() -> Vec<Row> {
        vec![
            row(json!({"id": 10, "user_id": 1, "title": "Notes on the engine"})),
            row(json!({"id": 11, "user_id": 2, "title": "Compilers"})),
        ]
    }

    /// Engine scripted with [`user_rows`] and [`post_rows`].
    pub fn seeded_engine() -> MockQueryEngine {
        MockQueryEngine::new()
            .with_rows("User", user_rows())
            .with_rows("Post", post_rows())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Quarry error variants.

    use super::*;

    /// Assert that a QuarryResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a QuarryResult is a missing-store precondition error.
    #[track_caller]
    pub fn assert_store_not_configured<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Precondition(PreconditionError::StoreNotConfigured { .. })) => {}
            other => panic!("Expected StoreNotConfigured, got: {:?}", other),
        }
    }

    /// Assert that a QuarryResult is an Engine error.
    #[track_caller]
    pub fn assert_engine_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Engine(_)) => {}
            other => panic!("Expected Engine error, got: {:?}", other),
        }
    }

    /// Assert that a QuarryResult is an Invalidation error that failed on
    /// `resource`.
    #[track_caller]
    pub fn assert_invalidation_failed_on<T: std::fmt::Debug>(
        result: &QuarryResult<T>,
        resource: &str,
    ) {
        match result {
            Err(QuarryError::Invalidation(err)) => {
                assert_eq!(err.failed, resource, "Wrong resource in InvalidationError");
            }
            other => panic!("Expected Invalidation error on {}, got: {:?}", resource, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
