//! Cache key derivation.
//!
//! A [`CacheKey`] is the SHA-256 digest of a canonical JSON document
//! `{resource, version, operation, descriptor}`, hex-encoded behind a prefix:
//!
//! ```text
//! <prefix><resource>:<64 hex chars>
//! ```
//!
//! The resource name is repeated in clear so store-side tooling can group
//! entries per resource. Canonicalization sorts every JSON object by key,
//! so the digest depends only on the descriptor's final state and is stable
//! across processes.

use quarry_core::{OperationKind, QueryDescriptor, StoreError};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::version::NamespaceVersionStore;

/// Length of the hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// A derived cache key.
///
/// Only constructible through [`CacheKey::compute`], so a key always embeds
/// the version it was derived under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    key: String,
    resource: String,
    version: u64,
    operation: OperationKind,
}

impl CacheKey {
    /// Derive the key for `descriptor` at a known `version`.
    pub fn compute(
        prefix: &str,
        resource: &str,
        version: u64,
        operation: OperationKind,
        descriptor: &QueryDescriptor,
    ) -> Result<Self, StoreError> {
        let descriptor = serde_json::to_value(descriptor).map_err(|e| StoreError::Codec {
            reason: format!("descriptor not serializable: {}", e),
        })?;
        let document = canonicalize(json!({
            "resource": resource,
            "version": version,
            "operation": operation.as_str(),
            "descriptor": descriptor,
        }));
        let bytes = serde_json::to_vec(&document).map_err(|e| StoreError::Codec {
            reason: e.to_string(),
        })?;
        let digest = hex::encode(Sha256::digest(&bytes));

        Ok(Self {
            inner: CacheKeyInner {
                key: format!("{}{}:{}", prefix, resource, digest),
                resource: resource.to_string(),
                version,
                operation,
            },
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner.key
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    /// Namespace version the key was derived under.
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn operation(&self) -> OperationKind {
        self.inner.operation
    }

    /// The hex digest part of the key.
    pub fn digest(&self) -> &str {
        let key = &self.inner.key;
        &key[key.len() - DIGEST_HEX_LEN..]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inner.key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Rebuild `value` with every object's keys in sorted order.
///
/// serde_json's `Map` only sorts when the `preserve_order` feature is off;
/// anything else in the dependency graph can switch it on.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Derives cache keys at the current namespace version.
#[derive(Debug, Clone)]
pub struct CacheKeyDeriver {
    versions: NamespaceVersionStore,
    prefix: String,
}

impl CacheKeyDeriver {
    pub fn new(versions: NamespaceVersionStore, prefix: impl Into<String>) -> Self {
        Self {
            versions,
            prefix: prefix.into(),
        }
    }

    pub fn versions(&self) -> &NamespaceVersionStore {
        &self.versions
    }

    /// Read the current version of `resource` and derive the key.
    pub async fn derive_key(
        &self,
        resource: &str,
        operation: OperationKind,
        descriptor: &QueryDescriptor,
    ) -> Result<CacheKey, StoreError> {
        let version = self.versions.get_version(resource).await?;
        CacheKey::compute(&self.prefix, resource, version, operation, descriptor)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use quarry_core::SortKey;

    fn filter_entries() -> impl Strategy<Value = Vec<(String, i64)>> {
        prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: filters merged in any order with distinct keys produce
        /// the same key.
        #[test]
        fn prop_key_independent_of_filter_call_order(
            entries in filter_entries(),
            seed in any::<u64>(),
        ) {
            let mut shuffled = entries.clone();
            // Deterministic rotation stands in for a shuffle
            if !shuffled.is_empty() {
                let by = (seed as usize) % shuffled.len();
                shuffled.rotate_left(by);
            }

            let mut a = QueryDescriptor::new();
            for (k, v) in &entries {
                a.merge_filters([(k.clone(), *v)]);
            }
            let mut b = QueryDescriptor::new();
            b.merge_filters(shuffled);

            let ka = CacheKey::compute("p:", "R", 1, OperationKind::FetchMany, &a).expect("key");
            let kb = CacheKey::compute("p:", "R", 1, OperationKind::FetchMany, &b).expect("key");
            prop_assert_eq!(ka, kb);
        }

        /// Property: a version change always changes the key.
        #[test]
        fn prop_version_changes_key(
            entries in filter_entries(),
            v1 in 1u64..1_000_000,
            delta in 1u64..1_000,
        ) {
            let mut descriptor = QueryDescriptor::new();
            descriptor.merge_filters(entries);
            descriptor.sort = vec![SortKey::asc("id")];

            let k1 = CacheKey::compute("p:", "R", v1, OperationKind::FetchMany, &descriptor).expect("key");
            let k2 = CacheKey::compute("p:", "R", v1 + delta, OperationKind::FetchMany, &descriptor).expect("key");
            prop_assert_ne!(k1.as_str(), k2.as_str());
        }
    }
}
