//! Invalidation by namespace version bump.
//!
//! Entries are never deleted. Bumping a resource's version moves its key
//! space, so entries derived under the old version are simply never looked
//! up again and age out through their TTL.

use std::sync::Arc;

use quarry_core::InvalidationError;

use super::events::log_invalidation;
use super::stats::CacheCounters;
use super::version::NamespaceVersionStore;

/// Versions after a completed invalidation, primary resource first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub versions: Vec<(String, u64)>,
}

impl InvalidationReport {
    /// New version of `resource`, if it was part of this invalidation.
    pub fn version_of(&self, resource: &str) -> Option<u64> {
        self.versions
            .iter()
            .find(|(name, _)| name == resource)
            .map(|(_, v)| *v)
    }
}

/// Bumps a resource and its declared dependents.
#[derive(Debug, Clone)]
pub struct InvalidationCoordinator {
    versions: NamespaceVersionStore,
    counters: Arc<CacheCounters>,
    logging: bool,
}

impl InvalidationCoordinator {
    pub fn new(versions: NamespaceVersionStore) -> Self {
        Self {
            versions,
            counters: Arc::new(CacheCounters::new()),
            logging: false,
        }
    }

    pub fn with_counters(mut self, counters: Arc<CacheCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Emit an invalidation event per bumped resource.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Bump `resource`, then each of `dependents` in order.
    ///
    /// Stops at the first failure. Bumps already applied stay applied; the
    /// error names them, the failing resource, and the ones not attempted.
    pub async fn invalidate<S: AsRef<str>>(
        &self,
        resource: &str,
        dependents: &[S],
    ) -> Result<InvalidationReport, InvalidationError> {
        let targets: Vec<&str> = std::iter::once(resource)
            .chain(dependents.iter().map(AsRef::as_ref))
            .collect();

        let mut applied = Vec::with_capacity(targets.len());
        for (i, name) in targets.iter().enumerate() {
            match self.versions.bump_version(name).await {
                Ok(version) => {
                    self.counters.record_invalidation();
                    log_invalidation(self.logging, name, version);
                    applied.push((name.to_string(), version));
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        resource = %name,
                        applied = applied.len(),
                        "Invalidation stopped on failed version bump"
                    );
                    return Err(InvalidationError {
                        applied,
                        failed: name.to_string(),
                        pending: targets[i + 1..].iter().map(|s| s.to_string()).collect(),
                        source: e,
                    });
                }
            }
        }

        Ok(InvalidationReport { versions: applied })
    }
}
