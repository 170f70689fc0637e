//! Configuration Loader
//!
//! Layers configuration sources with the `config` crate, lowest priority
//! first:
//!
//! 1. Built-in defaults (`#[serde(default)]` on every section)
//! 2. Optional TOML file: `$CACHE_SYNC_CONFIG`, else `config/cache-sync.toml`
//! 3. Environment variables: `CACHE_SYNC__REDIS__URL`,
//!    `CACHE_SYNC__CIRCUIT_BREAKER__FAILURE_THRESHOLD`, ...

use super::CacheSyncConfig;
use crate::error::{CacheError, CacheResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_PATH_ENV: &str = "CACHE_SYNC_CONFIG";
const ENV_PREFIX: &str = "CACHE_SYNC";
const DEFAULT_CONFIG_PATH: &str = "config/cache-sync.toml";

/// Loads [`CacheSyncConfig`] from files and the environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    use_environment: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self {
            path,
            use_environment: true,
        }
    }
}

impl ConfigLoader {
    /// Load from an explicit file path (the file may be absent)
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            use_environment: true,
        }
    }

    /// Ignore `CACHE_SYNC__*` variables (keeps tests independent of the host)
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    /// Convenience: default sources, loaded and validated
    pub fn load() -> CacheResult<CacheSyncConfig> {
        Self::default().build()
    }

    /// Merge all sources, deserialize and validate
    pub fn build(&self) -> CacheResult<CacheSyncConfig> {
        debug!(path = %self.path.display(), "Loading cache configuration");

        let mut builder = config::Config::builder()
            .add_source(config::File::from(self.path.clone()).required(false));

        if self.use_environment {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: CacheSyncConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        config.validate()?;

        info!(
            backend = %config.backend,
            pool_size = config.redis.pool_size,
            compression_threshold_bytes = config.cache.compression_threshold_bytes,
            failure_threshold = config.circuit_breaker.failure_threshold,
            sync_enabled = config.sync.enabled,
            "Cache configuration loaded"
        );

        Ok(config)
    }
}
