//! Fluent query builder.
//!
//! Configuration calls are synchronous and only accumulate into a
//! [`QueryDescriptor`]; the terminal `fetch_*` calls are the only ones that
//! touch the store or the engine. A builder can be executed more than once;
//! each execution reads the descriptor as it stands.

use std::sync::Arc;
use std::time::Duration;

use quarry_core::{
    ConfigError, Constraint, ExecutionOverrides, FilterOperator, OperationKind, Pagination,
    Projection, QuarryResult, QueryDescriptor, RelationSpec, Resource, Row, SortKey,
};
use quarry_storage::{CacheAsideExecutor, CacheKey, CachePolicy};
use serde_json::Value;

/// Builder for one read query against a resource.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    executor: Arc<CacheAsideExecutor>,
    resource: Arc<Resource>,
    descriptor: QueryDescriptor,
    policy: CachePolicy,
}

impl QueryBuilder {
    pub(crate) fn new(executor: Arc<CacheAsideExecutor>, resource: Arc<Resource>) -> Self {
        Self {
            executor,
            resource,
            descriptor: QueryDescriptor::new(),
            policy: CachePolicy::bypass(),
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Shallow-merge `filters` into the filter map. A key set by an earlier
    /// call is overwritten.
    pub fn filter<I, K, C>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = (K, C)>,
        K: Into<String>,
        C: Into<Constraint>,
    {
        self.descriptor.merge_filters(filters);
        self
    }

    /// Filter on equality.
    pub fn filter_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter([(field.into(), Constraint::Equals(value.into()))])
    }

    /// Filter with an explicit operator.
    pub fn filter_op(
        self,
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.filter([(field.into(), Constraint::op(operator, value))])
    }

    /// Project `fields`, resolving virtual fields against the resource's
    /// registry. Replaces any earlier projection; an empty list selects all
    /// fields.
    pub fn select<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.descriptor.projection = Projection::resolve(fields, self.resource.virtual_fields());
        self
    }

    /// Append one relation inclusion.
    pub fn include(mut self, relation: RelationSpec) -> Self {
        self.descriptor.relations.push(relation);
        self
    }

    /// Append relation inclusions. Repeated calls accumulate.
    pub fn include_relations<I>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = RelationSpec>,
    {
        self.descriptor.relations.extend(relations);
        self
    }

    /// Replace the sort order.
    pub fn sort<I>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = SortKey>,
    {
        self.descriptor.sort = order.into_iter().collect();
        self
    }

    /// Select the 1-based `page` of `page_size` rows.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when either argument is below 1.
    pub fn paginate(mut self, page: u64, page_size: u64) -> Result<Self, ConfigError> {
        let pagination = Pagination::from_page(page, page_size)?;
        self.descriptor.apply_pagination(pagination);
        Ok(self)
    }

    /// Cache the result for `ttl_seconds`. Without this call the query
    /// bypasses the cache entirely.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when `ttl_seconds` is 0.
    pub fn cache_for(mut self, ttl_seconds: u64) -> Result<Self, ConfigError> {
        if ttl_seconds == 0 {
            return Err(ConfigError::invalid(
                "ttl_seconds",
                ttl_seconds,
                "must be at least 1",
            ));
        }
        self.policy.ttl = Some(Duration::from_secs(ttl_seconds));
        Ok(self)
    }

    /// Per-query cache event logging, overriding the client setting.
    pub fn logging(mut self, enabled: bool) -> Self {
        self.policy = self.policy.with_logging(enabled);
        self
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn into_descriptor(self) -> QueryDescriptor {
        self.descriptor
    }

    /// The key this query would be cached under right now.
    pub async fn cache_key(&self, operation: OperationKind) -> QuarryResult<CacheKey> {
        self.executor
            .cache_key(
                self.resource.name(),
                operation,
                &self.descriptor,
                &ExecutionOverrides::new(),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Fetch zero or more rows.
    pub async fn fetch_many(&self) -> QuarryResult<Vec<Row>> {
        self.fetch_many_with(&ExecutionOverrides::new()).await
    }

    /// Fetch zero or more rows with per-call overrides.
    ///
    /// Overrides are applied before key derivation, so an overridden read
    /// never shares a cache entry with a plain one.
    pub async fn fetch_many_with(&self, overrides: &ExecutionOverrides) -> QuarryResult<Vec<Row>> {
        self.executor
            .fetch_many(self.resource.name(), &self.descriptor, &self.policy, overrides)
            .await
    }

    /// Fetch zero or one row.
    pub async fn fetch_one(&self) -> QuarryResult<Option<Row>> {
        self.fetch_one_with(&ExecutionOverrides::new()).await
    }

    /// Fetch zero or one row with per-call overrides.
    pub async fn fetch_one_with(&self, overrides: &ExecutionOverrides) -> QuarryResult<Option<Row>> {
        self.executor
            .fetch_one(self.resource.name(), &self.descriptor, &self.policy, overrides)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quarry_core::{ComputedExpr, EngineError, QuarryConfig, QueryEngine};
    use serde_json::json;

    struct NoEngine;

    #[async_trait]
    impl QueryEngine for NoEngine {
        async fn fetch_many(&self, _: &str, _: &QueryDescriptor) -> Result<Vec<Row>, EngineError> {
            Ok(Vec::new())
        }

        async fn fetch_one(&self, _: &str, _: &QueryDescriptor) -> Result<Option<Row>, EngineError> {
            Ok(None)
        }
    }

    fn builder() -> QueryBuilder {
        let executor = Arc::new(CacheAsideExecutor::new(
            Arc::new(NoEngine),
            QuarryConfig::default(),
        ));
        let users = Resource::new("User")
            .with_virtual_field(
                "post_count",
                ComputedExpr::raw("(SELECT COUNT(*) FROM posts WHERE posts.user_id = users.id)"),
            )
            .shared();
        QueryBuilder::new(executor, users)
    }

    #[test]
    fn test_filter_last_write_wins() {
        let q = builder()
            .filter([("status", "active"), ("role", "admin")])
            .filter([("status", "banned")]);
        assert_eq!(q.descriptor().filters["status"], Constraint::from("banned"));
        assert_eq!(q.descriptor().filters["role"], Constraint::from("admin"));
    }

    #[test]
    fn test_filter_helpers() {
        let q = builder()
            .filter_eq("id", 7)
            .filter_op("age", FilterOperator::Gte, 18);
        assert_eq!(q.descriptor().filters["id"], Constraint::Equals(json!(7)));
        assert_eq!(q.descriptor().filters["age"].operator(), FilterOperator::Gte);
    }

    #[test]
    fn test_select_partitions_virtual_fields() {
        let q = builder().select(&["id", "post_count", "name"]);
        let projection = &q.descriptor().projection;
        assert_eq!(projection.columns, vec!["id", "name"]);
        assert_eq!(projection.virtuals.len(), 1);
        assert_eq!(projection.virtuals[0].name, "post_count");
    }

    #[test]
    fn test_select_only_virtual_fields() {
        let q = builder().select(&["post_count"]);
        let projection = &q.descriptor().projection;
        assert!(projection.columns.is_empty());
        assert!(!projection.includes_all_columns());
        assert_eq!(projection.virtuals.len(), 1);
    }

    #[test]
    fn test_select_replaces_previous_projection() {
        let q = builder().select(&["id", "name"]).select(&["email"]);
        assert_eq!(q.descriptor().projection.columns, vec!["email"]);

        let all = builder().select(&["id"]).select::<&str>(&[]);
        assert!(all.descriptor().projection.is_all());
    }

    #[test]
    fn test_relations_accumulate() {
        let q = builder()
            .include(RelationSpec::new("Post").with_fields(&["id", "title"]))
            .include_relations([RelationSpec::new("Profile"), RelationSpec::new("Team").with_alias("org")]);
        let names: Vec<_> = q.descriptor().relations.iter().map(|r| r.resource.as_str()).collect();
        assert_eq!(names, vec!["Post", "Profile", "Team"]);
    }

    #[test]
    fn test_sort_replaces() {
        let q = builder()
            .sort([SortKey::asc("name"), SortKey::asc("id")])
            .sort([SortKey::desc("created_at")]);
        assert_eq!(q.descriptor().sort, vec![SortKey::desc("created_at")]);
    }

    #[test]
    fn test_paginate() {
        let q = builder().paginate(3, 25).unwrap();
        assert_eq!(q.descriptor().limit, Some(25));
        assert_eq!(q.descriptor().offset, Some(50));

        assert!(matches!(
            builder().paginate(0, 10),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "page"
        ));
        assert!(builder().paginate(1, 0).is_err());
    }

    #[test]
    fn test_cache_for() {
        let q = builder().cache_for(60).unwrap();
        assert_eq!(q.policy().ttl, Some(Duration::from_secs(60)));
        assert!(builder().cache_for(0).is_err());
        assert!(!builder().policy().is_cached());
    }

    #[test]
    fn test_logging_override() {
        let q = builder().logging(true);
        assert_eq!(q.policy().logging, Some(true));
    }

    #[test]
    fn test_builders_do_not_share_state() {
        let base = builder().filter_eq("status", "active");
        let narrowed = base.clone().filter_eq("role", "admin");
        assert_eq!(base.descriptor().filters.len(), 1);
        assert_eq!(narrowed.descriptor().filters.len(), 2);
    }
}
