//! Error types for Quarry operations

use thiserror::Error;

/// Configuration errors.
///
/// Raised synchronously by builder calls and config validation, never
/// deferred to execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

impl ConfigError {
    pub fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Codec error: {reason}")]
    Codec { reason: String },
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Errors raised by the underlying query engine.
///
/// These are passed through to the caller unchanged; Quarry never
/// interprets or retries them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid query on {resource}: {reason}")]
    InvalidQuery { resource: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("Engine connection failed: {reason}")]
    Connection { reason: String },

    #[error("Query execution failed: {reason}")]
    Execution { reason: String },
}

/// Errors raised when a component is used before it was wired up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("No key-value store configured (required by {operation})")]
    StoreNotConfigured { operation: String },
}

/// Partial invalidation failure.
///
/// Bumps are independent; whatever was applied before the failure stays
/// applied. The caller is expected to retry `failed` and `pending`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalidation incomplete: failed to bump {failed} ({} pending): {source}", .pending.len())]
pub struct InvalidationError {
    /// Resources bumped before the failure, with their new versions.
    pub applied: Vec<(String, u64)>,
    /// The resource whose bump failed.
    pub failed: String,
    /// Resources never attempted.
    pub pending: Vec<String>,
    #[source]
    pub source: StoreError,
}

impl InvalidationError {
    /// All resource names that still need a bump, failed one first.
    pub fn remaining(&self) -> Vec<String> {
        std::iter::once(self.failed.clone())
            .chain(self.pending.iter().cloned())
            .collect()
    }
}

/// Master error type for all Quarry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuarryError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalidation error: {0}")]
    Invalidation(#[from] InvalidationError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),
}

/// Result type alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================
