//! Namespace version counters.
//!
//! Every resource name owns a positive version number stored as a decimal
//! string under `<prefix><resource>`. Cache keys embed the version current at
//! derivation time, so bumping it orphans every entry derived before the bump.

use std::sync::Arc;

use quarry_core::StoreError;

use crate::kv::{encode_counter, parse_counter, KeyValueStore};

/// Version observed for a resource that has never been seen.
pub const INITIAL_VERSION: u64 = 1;

/// Per-resource version counters over a [`KeyValueStore`].
#[derive(Clone)]
pub struct NamespaceVersionStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl NamespaceVersionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Store key holding the version of `resource`.
    pub fn key_for(&self, resource: &str) -> String {
        format!("{}{}", self.prefix, resource)
    }

    /// Current version of `resource`, initializing it to 1 on first sight.
    ///
    /// Initialization goes through `set_if_absent`. Two first readers racing
    /// on a store without an atomic `set_if_absent` may both write `1`; they
    /// converge on the same value.
    pub async fn get_version(&self, resource: &str) -> Result<u64, StoreError> {
        let key = self.key_for(resource);
        if let Some(bytes) = self.store.get(&key).await? {
            return parse_counter(&key, &bytes);
        }

        if self
            .store
            .set_if_absent(&key, encode_counter(INITIAL_VERSION))
            .await?
        {
            return Ok(INITIAL_VERSION);
        }

        // Lost the race: someone else initialized (or already bumped) it
        match self.store.get(&key).await? {
            Some(bytes) => parse_counter(&key, &bytes),
            None => Ok(INITIAL_VERSION),
        }
    }

    /// Current version of `resource` without initializing it.
    pub async fn peek_version(&self, resource: &str) -> Result<Option<u64>, StoreError> {
        let key = self.key_for(resource);
        match self.store.get(&key).await? {
            Some(bytes) => parse_counter(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Increment the version of `resource`, returning the new value.
    ///
    /// An absent counter counts as 0, so bumping an unseen resource yields 1.
    pub async fn bump_version(&self, resource: &str) -> Result<u64, StoreError> {
        self.store.increment(&self.key_for(resource)).await
    }
}

impl std::fmt::Debug for NamespaceVersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceVersionStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;

    fn versions() -> (NamespaceVersionStore, Arc<InMemoryKvStore>) {
        let kv = Arc::new(InMemoryKvStore::new());
        (NamespaceVersionStore::new(kv.clone(), "ns:"), kv)
    }

    #[tokio::test]
    async fn test_unseen_resource_starts_at_one() {
        let (versions, kv) = versions();
        assert_eq!(versions.peek_version("User").await.unwrap(), None);
        assert_eq!(versions.get_version("User").await.unwrap(), 1);
        assert_eq!(versions.get_version("User").await.unwrap(), 1);
        // Persisted as a decimal string
        assert_eq!(kv.get("ns:User").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_bump_increments_by_one() {
        let (versions, _) = versions();
        assert_eq!(versions.get_version("User").await.unwrap(), 1);
        assert_eq!(versions.bump_version("User").await.unwrap(), 2);
        assert_eq!(versions.bump_version("User").await.unwrap(), 3);
        assert_eq!(versions.get_version("User").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bump_unseen_resource() {
        let (versions, _) = versions();
        assert_eq!(versions.bump_version("Post").await.unwrap(), 1);
        assert_eq!(versions.get_version("Post").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resources_are_independent() {
        let (versions, _) = versions();
        versions.bump_version("User").await.unwrap();
        versions.bump_version("User").await.unwrap();
        assert_eq!(versions.get_version("Post").await.unwrap(), 1);
        assert_eq!(versions.get_version("User").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_reported() {
        let (versions, kv) = versions();
        kv.set("ns:User", b"garbage".to_vec()).await.unwrap();
        assert!(matches!(
            versions.get_version("User").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_readers_agree() {
        let (versions, _) = versions();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let versions = versions.clone();
            handles.push(tokio::spawn(async move {
                versions.get_version("Comment").await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
    }
}
