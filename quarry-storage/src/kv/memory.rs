//! In-memory key-value store.
//!
//! Uses `tokio::sync::RwLock` for async access. Expired entries are hidden
//! from reads immediately and physically removed by [`InMemoryKvStore::purge_expired`]
//! or when overwritten.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::StoreError;
use tokio::sync::RwLock;

use super::{encode_counter, next_counter, parse_counter, KeyValueStore};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory store with per-entry expiry.
///
/// `set_if_absent` and `increment` run under a single write lock, so they are
/// atomic with respect to every other call on the same store.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove expired entries, returning how many were dropped.
    pub async fn purge_expired(&self) -> u64 {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        (before - entries.len()) as u64
    }

    /// Keys of live entries starting with `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

fn expiry_from(ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .ok_or_else(|| StoreError::Codec {
            reason: format!("expiry out of range: {:?}", ttl),
        })
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Utc::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = expiry_from(ttl)?;
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .is_some_and(|e| e.is_live(Utc::now())))
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(Utc::now())) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let current = match entries.get(key).filter(|e| e.is_live(Utc::now())) {
            Some(entry) => parse_counter(key, &entry.value)?,
            None => 0,
        };
        let next = next_counter(key, current)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: encode_counter(next),
                expires_at: None,
            },
        );
        Ok(next)
    }
}
