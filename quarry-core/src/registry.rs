//! Resources and their virtual-field registries
//!
//! A virtual field is a name the caller can `select` like a column, backed by
//! an expression the query engine evaluates (computed column, correlated
//! subquery, ...). Resolution is a plain map lookup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opaque computed expression understood by the query engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputedExpr(String);

impl ComputedExpr {
    /// Wrap a raw engine expression.
    pub fn raw(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Mapping from virtual field name to its expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualFieldRegistry {
    fields: BTreeMap<String, ComputedExpr>,
}

impl VirtualFieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a virtual field.
    pub fn register(&mut self, name: impl Into<String>, expr: ComputedExpr) -> &mut Self {
        self.fields.insert(name.into(), expr);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&ComputedExpr> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// A named resource (model) together with its virtual fields.
///
/// The name doubles as the namespace for cache versioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    name: String,
    virtual_fields: VirtualFieldRegistry,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            virtual_fields: VirtualFieldRegistry::new(),
        }
    }

    /// Attach a virtual field.
    pub fn with_virtual_field(mut self, name: impl Into<String>, expr: ComputedExpr) -> Self {
        self.virtual_fields.register(name, expr);
        self
    }

    /// Replace the whole registry.
    pub fn with_registry(mut self, registry: VirtualFieldRegistry) -> Self {
        self.virtual_fields = registry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn virtual_fields(&self) -> &VirtualFieldRegistry {
        &self.virtual_fields
    }

    /// Share this resource between builders.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
