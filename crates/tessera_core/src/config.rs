//! # Pool Configuration
//!
//! Pool sizing loaded once at startup from TOML.
//!
//! ```toml
//! pool_size = 4096
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{PoolError, PoolResult};
use crate::memory::validate_size;

/// Configuration for a [`MemoryPool`](crate::MemoryPool).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Size of the backing buffer in bytes.
    ///
    /// Signed so that a negative size is a reportable configuration error
    /// rather than a parse failure.
    pub pool_size: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            // One page.
            pool_size: 4096,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration for a pool of `pool_size` bytes.
    #[must_use]
    pub const fn new(pool_size: i64) -> Self {
        Self { pool_size }
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> PoolResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| PoolError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> PoolResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("loaded pool config from {}", path.display());
        Ok(config)
    }

    /// Checks that the configured size is usable, returning it in bytes.
    pub fn validate(&self) -> PoolResult<usize> {
        validate_size(self.pool_size)
    }
}
