//! Key-value store boundary.
//!
//! The cache stores two kinds of values through [`KeyValueStore`]: serialized
//! result sets under derived cache keys, and namespace version counters
//! (decimal strings) under version keys.
//!
//! # Atomicity
//!
//! `set_if_absent` and `increment` have read-then-write default
//! implementations for stores without native primitives. Those defaults can
//! race under concurrent callers; backends that can do better (both shipped
//! backends do) override them.

pub mod lmdb;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use quarry_core::StoreError;

pub use lmdb::{LmdbKvStore, LmdbStoreError};
pub use memory::InMemoryKvStore;

/// Key-value store consumed by the cache layer.
///
/// Implementations must be thread-safe; one store handle is shared by every
/// query built from a client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key` without expiry.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remove `key`. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    ///
    /// The default implementation is a get followed by a set and is not
    /// atomic.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value).await?;
        Ok(true)
    }

    /// Increment the decimal counter under `key` (absent counts as 0) and
    /// return the new value.
    ///
    /// The default implementation is a get followed by a set and can lose
    /// updates under concurrent callers.
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let current = match self.get(key).await? {
            Some(bytes) => parse_counter(key, &bytes)?,
            None => 0,
        };
        let next = next_counter(key, current)?;
        self.set(key, encode_counter(next)).await?;
        Ok(next)
    }
}

/// Parse a decimal counter value.
pub fn parse_counter(key: &str, bytes: &[u8]) -> Result<u64, StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("expected decimal counter, got {} bytes", bytes.len()),
        })
}

/// The value following `current`, or `Corrupt` if the counter is saturated.
pub fn next_counter(key: &str, current: u64) -> Result<u64, StoreError> {
    current.checked_add(1).ok_or_else(|| StoreError::Corrupt {
        key: key.to_string(),
        reason: "counter overflow".to_string(),
    })
}

/// Encode a counter as its decimal representation.
pub fn encode_counter(value: u64) -> Vec<u8> {
    value.to_string().into_bytes()
}
