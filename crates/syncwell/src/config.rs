// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use syncwell_store::{DEFAULT_CAPACITY, DEFAULT_PREFIX};

/// Error produced while loading a [`SyncConfig`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path}")]
    Io {
        /// The file that was read.
        path: String,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML for this schema.
    #[error("invalid configuration document")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables shared by every session a [`SyncClient`](crate::SyncClient) creates.
///
/// Durations are expressed in milliseconds so the TOML form stays flat. Every field has a
/// default, so an empty document is a valid configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use syncwell::SyncConfig;
///
/// let config = SyncConfig::from_toml_str(
///     r#"
///     store_capacity = 250
///     request_timeout_ms = 10000
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.store_capacity, 250);
/// assert_eq!(config.request_timeout(), Some(Duration::from_secs(10)));
/// assert_eq!(config.revalidate_guard(), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Volatile-tier capacity of the store.
    pub store_capacity: usize,
    /// Prefix of persisted keys.
    pub store_prefix: String,
    /// Default maximum age of cached data used by read sessions.
    pub default_cache_max_age_ms: u64,
    /// Minimum spacing between passive revalidations of one session.
    pub revalidate_guard_ms: u64,
    /// How long before expiry a token is refreshed proactively.
    pub token_refresh_leeway_ms: u64,
    /// Per-request timeout; zero disables it.
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_capacity: DEFAULT_CAPACITY,
            store_prefix: DEFAULT_PREFIX.to_owned(),
            default_cache_max_age_ms: 300_000,
            revalidate_guard_ms: 3_000,
            token_refresh_leeway_ms: 30_000,
            request_timeout_ms: 0,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents or unknown fields and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&document)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_capacity == 0 {
            return Err(ConfigError::Invalid("store_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Returns the default cache maximum age.
    #[must_use]
    pub fn default_cache_max_age(&self) -> Duration {
        Duration::from_millis(self.default_cache_max_age_ms)
    }

    /// Returns the passive revalidation guard.
    #[must_use]
    pub fn revalidate_guard(&self) -> Duration {
        Duration::from_millis(self.revalidate_guard_ms)
    }

    /// Returns the token refresh leeway.
    #[must_use]
    pub fn token_refresh_leeway(&self) -> Duration {
        Duration::from_millis(self.token_refresh_leeway_ms)
    }

    /// Returns the per-request timeout, if enabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}
