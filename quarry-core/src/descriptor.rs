//! Query descriptor
//!
//! The immutable-at-execution description of a read query's shape. Builders
//! accumulate into a [`QueryDescriptor`]; the cache layer hashes it and the
//! query engine executes it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::filter::{merge_filters, Constraint, FilterMap};
use crate::registry::{ComputedExpr, VirtualFieldRegistry};

/// A single result row as returned by the query engine.
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// OPERATION KIND
// ============================================================================

/// Read operation kinds that can be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Zero or more rows.
    FetchMany,
    /// Zero or one row.
    FetchOne,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchMany => "fetch_many",
            Self::FetchOne => "fetch_one",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

/// A virtual field projected through its computed expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualProjection {
    pub name: String,
    pub expr: ComputedExpr,
}

/// Projected fields: ordinary columns plus virtual expressions.
///
/// `all_columns` is set only for the plain "all fields" projection. Once a
/// virtual field is requested the ordinary columns are listed explicitly, so
/// an empty `columns` next to virtuals projects the virtuals alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub all_columns: bool,
    pub columns: Vec<String>,
    pub virtuals: Vec<VirtualProjection>,
}

impl Default for Projection {
    fn default() -> Self {
        Self::all()
    }
}

impl Projection {
    /// Project every base column and nothing else.
    pub fn all() -> Self {
        Self {
            all_columns: true,
            columns: Vec::new(),
            virtuals: Vec::new(),
        }
    }

    /// Partition `fields` against `registry`.
    ///
    /// Names found in the registry become virtual projections, everything
    /// else an ordinary column. Request order is kept; repeated names are
    /// projected once.
    pub fn resolve<S: AsRef<str>>(fields: &[S], registry: &VirtualFieldRegistry) -> Self {
        let mut projection = Self {
            all_columns: fields.is_empty(),
            columns: Vec::new(),
            virtuals: Vec::new(),
        };
        for field in fields {
            let name = field.as_ref();
            match registry.resolve(name) {
                Some(expr) => {
                    if !projection.virtuals.iter().any(|v| v.name == name) {
                        projection.virtuals.push(VirtualProjection {
                            name: name.to_string(),
                            expr: expr.clone(),
                        });
                    }
                }
                None => {
                    if !projection.columns.iter().any(|c| c == name) {
                        projection.columns.push(name.to_string());
                    }
                }
            }
        }
        projection
    }

    /// True when every base column is projected.
    pub fn includes_all_columns(&self) -> bool {
        self.all_columns
    }

    /// True when this is the plain "all fields" projection.
    pub fn is_all(&self) -> bool {
        self.all_columns && self.virtuals.is_empty()
    }

    pub fn has_virtuals(&self) -> bool {
        !self.virtuals.is_empty()
    }
}

// ============================================================================
// RELATIONS & SORTING
// ============================================================================

/// Inclusion of a related resource with its own projected fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Related resource name.
    pub resource: String,
    /// Optional alias the relation is exposed under.
    pub alias: Option<String>,
    /// Projected fields of the related resource; empty means all.
    pub fields: Vec<String>,
}

impl RelationSpec {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            alias: None,
            fields: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One `(field, direction)` pair of a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

// ============================================================================
// PAGINATION
// ============================================================================

/// Limit/offset pair derived from 1-based page numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

impl Pagination {
    /// Compute limit/offset for a 1-based `page` of `page_size` rows.
    ///
    /// Both arguments must be at least 1.
    pub fn from_page(page: u64, page_size: u64) -> Result<Self, ConfigError> {
        if page < 1 {
            return Err(ConfigError::invalid("page", page, "must be at least 1"));
        }
        if page_size < 1 {
            return Err(ConfigError::invalid(
                "page_size",
                page_size,
                "must be at least 1",
            ));
        }
        let offset = (page - 1).checked_mul(page_size).ok_or_else(|| {
            ConfigError::invalid("page", page, "offset overflows for this page size")
        })?;
        Ok(Self {
            limit: page_size,
            offset,
        })
    }
}

// ============================================================================
// DESCRIPTOR
// ============================================================================

/// Full shape of a read query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub filters: FilterMap,
    pub projection: Projection,
    pub relations: Vec<RelationSpec>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow-merge filters, last write wins per key.
    pub fn merge_filters<I, K, C>(&mut self, filters: I)
    where
        I: IntoIterator<Item = (K, C)>,
        K: Into<String>,
        C: Into<Constraint>,
    {
        merge_filters(&mut self.filters, filters);
    }

    pub fn apply_pagination(&mut self, pagination: Pagination) {
        self.limit = Some(pagination.limit);
        self.offset = Some(pagination.offset);
    }

    /// The descriptor actually executed once `overrides` are applied.
    pub fn with_overrides(&self, overrides: &ExecutionOverrides) -> QueryDescriptor {
        let mut effective = self.clone();
        effective.merge_filters(overrides.filters.clone());
        if let Some(sort) = &overrides.sort {
            effective.sort = sort.clone();
        }
        if overrides.limit.is_some() {
            effective.limit = overrides.limit;
        }
        if overrides.offset.is_some() {
            effective.offset = overrides.offset;
        }
        effective
    }
}

// ============================================================================
// EXECUTION OVERRIDES
// ============================================================================

/// Per-call adjustments applied on top of a built descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOverrides {
    /// Merged into the descriptor's filters (last write wins).
    pub filters: FilterMap,
    /// Replaces the sort order when set.
    pub sort: Option<Vec<SortKey>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Per-call logging flag; wins over the query and global flags.
    pub logging: Option<bool>,
}

impl ExecutionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, field: impl Into<String>, constraint: impl Into<Constraint>) -> Self {
        self.filters.insert(field.into(), constraint.into());
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = Some(enabled);
        self
    }

    /// True when applying these overrides leaves a descriptor unchanged.
    pub fn is_noop(&self) -> bool {
        self.filters.is_empty() && self.sort.is_none() && self.limit.is_none() && self.offset.is_none()
    }
}
