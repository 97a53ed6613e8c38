//! Cache event logging.
//!
//! The four observable event kinds are emitted on the `quarry::cache`
//! tracing target, only when the effective logging flag is on. Store
//! failures are not events: they always log at `warn`.

use quarry_core::OperationKind;

/// Tracing target for cache events.
pub const CACHE_TARGET: &str = "quarry::cache";

/// Observable cache event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    Hit,
    Miss,
    Write,
    Invalidation,
}

impl CacheEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Write => "write",
            Self::Invalidation => "invalidation",
        }
    }
}

impl std::fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emit a read-path event (hit, miss or write) for `key`.
pub(crate) fn log_read_event(
    enabled: bool,
    kind: CacheEventKind,
    resource: &str,
    operation: OperationKind,
    key: &str,
) {
    if !enabled {
        return;
    }
    tracing::debug!(
        target: CACHE_TARGET,
        event = kind.as_str(),
        resource = %resource,
        operation = %operation,
        key = %key,
        "Cache {}",
        kind
    );
}

/// Emit an invalidation event for one bumped resource.
pub(crate) fn log_invalidation(enabled: bool, resource: &str, version: u64) {
    if !enabled {
        return;
    }
    tracing::info!(
        target: CACHE_TARGET,
        event = CacheEventKind::Invalidation.as_str(),
        resource = %resource,
        version = version,
        "Namespace version bumped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(CacheEventKind::Hit.to_string(), "hit");
        assert_eq!(CacheEventKind::Miss.as_str(), "miss");
        assert_eq!(CacheEventKind::Write.as_str(), "write");
        assert_eq!(CacheEventKind::Invalidation.as_str(), "invalidation");
    }
}
