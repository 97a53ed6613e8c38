//! Configuration types

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default prefix for derived cache-entry keys.
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "quarry:cache:";

/// Default prefix for namespace version counters.
pub const DEFAULT_VERSION_KEY_PREFIX: &str = "quarry:ns:";

/// Master configuration for a Quarry client.
///
/// Threaded through construction; per-query and per-call logging flags are
/// layered on top of `logging` rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarryConfig {
    /// Prefix for cache entry keys.
    pub cache_key_prefix: String,
    /// Prefix for namespace version counters.
    pub version_key_prefix: String,
    /// Global flag for cache hit/miss/write/invalidation events.
    pub logging: bool,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            cache_key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            version_key_prefix: DEFAULT_VERSION_KEY_PREFIX.to_string(),
            logging: false,
        }
    }
}

impl QuarryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `QUARRY_*` environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// - `QUARRY_CACHE_PREFIX`
    /// - `QUARRY_VERSION_PREFIX`
    /// - `QUARRY_LOG_CACHE` (`true`/`1` enables)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            cache_key_prefix: std::env::var("QUARRY_CACHE_PREFIX")
                .unwrap_or(defaults.cache_key_prefix),
            version_key_prefix: std::env::var("QUARRY_VERSION_PREFIX")
                .unwrap_or(defaults.version_key_prefix),
            logging: std::env::var("QUARRY_LOG_CACHE")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.logging),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_cache_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = prefix.into();
        self
    }

    pub fn with_version_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.version_key_prefix = prefix.into();
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Check the prefixes are usable and cannot collide.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_key_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cache_key_prefix".to_string(),
            });
        }
        if self.version_key_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "version_key_prefix".to_string(),
            });
        }
        if self.cache_key_prefix.starts_with(&self.version_key_prefix)
            || self.version_key_prefix.starts_with(&self.cache_key_prefix)
        {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("cache_key_prefix={}", self.cache_key_prefix),
                option_b: format!("version_key_prefix={}", self.version_key_prefix),
            });
        }
        Ok(())
    }

    /// Resolve the effective logging flag from optional overrides.
    ///
    /// The most specific setting wins: call, then query, then global.
    pub fn logging_for(&self, query: Option<bool>, call: Option<bool>) -> bool {
        call.or(query).unwrap_or(self.logging)
    }
}
