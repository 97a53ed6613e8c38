//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped store for cache entries and version counters.
//!
//! # Value Format
//!
//! Every stored value carries an 8-byte expiry header:
//! - Bytes 0-7: expiry as Unix milliseconds, little-endian (`0` = never)
//! - Bytes 8..: payload
//!
//! Expired values are hidden from reads and removed by
//! [`LmdbKvStore::purge_expired`] or when overwritten.
//!
//! # Thread Safety
//!
//! LMDB serializes write transactions, so `set_if_absent` and `increment`
//! are atomic: each runs its read and write inside one write transaction.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use quarry_core::StoreError;

use super::{encode_counter, next_counter, parse_counter, KeyValueStore};

const HEADER_LEN: usize = 8;
const NEVER_EXPIRES: i64 = 0;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Malformed value under key {0}")]
    Malformed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to StoreError.
impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Malformed(key) => StoreError::Corrupt {
                key,
                reason: "value shorter than expiry header".to_string(),
            },
            other => StoreError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Prefix `payload` with its expiry header.
fn encode_value(payload: &[u8], expires_at_millis: i64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&expires_at_millis.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Split a stored value into `(expires_at_millis, payload)`.
fn decode_value<'a>(key: &str, bytes: &'a [u8]) -> Result<(i64, &'a [u8]), LmdbStoreError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbStoreError::Malformed(key.to_string()));
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&bytes[0..HEADER_LEN]);
    Ok((i64::from_le_bytes(header), &bytes[HEADER_LEN..]))
}

fn is_live(expires_at_millis: i64, now_millis: i64) -> bool {
    expires_at_millis == NEVER_EXPIRES || expires_at_millis > now_millis
}

/// LMDB-backed key-value store.
///
/// # Example
///
/// ```ignore
/// use quarry_storage::{KeyValueStore, LmdbKvStore};
/// use std::time::Duration;
///
/// let store = LmdbKvStore::new("/tmp/quarry-cache", 100)?;
/// store.set_with_expiry("k", b"v".to_vec(), Duration::from_secs(60)).await?;
/// let value = store.get("k").await?;
/// ```
pub struct LmdbKvStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbKvStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| {
                LmdbStoreError::EnvOpen(format!("map size of {max_size_mb} MB overflows"))
            })?;
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this store
        // and never mapped with conflicting flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, db })
    }

    /// Remove expired values, returning how many were dropped.
    pub fn purge_expired(&self) -> Result<u64, LmdbStoreError> {
        let now = Utc::now().timestamp_millis();

        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let mut keys = Vec::new();
            for result in self.db.iter(&rtxn).map_err(txn_err)? {
                let (key, value) = result.map_err(txn_err)?;
                let expires_at = match decode_value("", value) {
                    Ok((expires_at, _)) => expires_at,
                    Err(_) => continue,
                };
                if !is_live(expires_at, now) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        Ok(deleted)
    }

    fn put(&self, key: &str, payload: &[u8], expires_at: i64) -> Result<(), LmdbStoreError> {
        let bytes = encode_value(payload, expires_at);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }
}

#[async_trait]
impl KeyValueStore for LmdbKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => {
                let (expires_at, payload) = decode_value(key, bytes)?;
                if is_live(expires_at, Utc::now().timestamp_millis()) {
                    Ok(Some(payload.to_vec()))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        Ok(self.put(key, &value, NEVER_EXPIRES)?)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let ttl_millis = i64::try_from(ttl.as_millis()).map_err(|_| StoreError::Codec {
            reason: format!("expiry out of range: {:?}", ttl),
        })?;
        let expires_at = Utc::now()
            .timestamp_millis()
            .saturating_add(ttl_millis.max(1));
        Ok(self.put(key, &value, expires_at)?)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let occupied = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => {
                let (expires_at, _) = decode_value(key, bytes)?;
                is_live(expires_at, Utc::now().timestamp_millis())
            }
            None => false,
        };
        if occupied {
            wtxn.abort();
            return Ok(false);
        }
        let bytes = encode_value(&value, NEVER_EXPIRES);
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let current = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => {
                let (expires_at, payload) = decode_value(key, bytes)?;
                if is_live(expires_at, Utc::now().timestamp_millis()) {
                    parse_counter(key, payload)?
                } else {
                    0
                }
            }
            None => 0,
        };
        let next = next_counter(key, current)?;
        let bytes = encode_value(&encode_counter(next), NEVER_EXPIRES);
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(next)
    }
}
