//! Cache configuration
//!
//! Defaults suit a single desktop client. Every field can be overridden from
//! the environment with [`CacheConfig::from_env`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const ENV_DATA_DIR: &str = "CLINIC_CACHE_DIR";
pub const ENV_STORE_NAME: &str = "CLINIC_CACHE_STORE";
pub const ENV_MEMORY_CAPACITY: &str = "CLINIC_CACHE_MEMORY_CAPACITY";
pub const ENV_SWEEP_SECS: &str = "CLINIC_CACHE_SWEEP_SECS";

const DEFAULT_STORE_NAME: &str = "clinic-cache";

/// Configuration for a [`CacheSystem`](crate::CacheSystem)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Base name of the on-disk stores
    pub store_name: String,
    /// Bumping this drops every persisted entry on the next start
    pub schema_version: u32,
    /// Directory holding the persistent tiers, `None` for the platform default
    pub data_dir: Option<PathBuf>,
    /// Maximum number of entries kept in memory
    ///
    /// Beyond it the memory tier evicts entries. Without a persistent tier
    /// this is the capacity of the whole cache; the sweeper drops the tag
    /// memberships of evicted keys.
    pub memory_capacity: u64,
    /// Size quota of the fallback store
    pub fallback_max_bytes: Option<usize>,
    /// Run the expired-entry sweeper at this interval
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_name: DEFAULT_STORE_NAME.to_string(),
            schema_version: 1,
            data_dir: None,
            memory_capacity: 2000,
            fallback_max_bytes: Some(5 * 1024 * 1024),
            sweep_interval: None,
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by `CLINIC_CACHE_*` environment variables
    ///
    /// Unparseable values are ignored with a warning. A sweep interval of
    /// zero seconds disables the sweeper.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(name) = std::env::var(ENV_STORE_NAME) {
            if !name.trim().is_empty() {
                config.store_name = name.trim().to_string();
            }
        }
        if let Some(capacity) = parse_env::<u64>(ENV_MEMORY_CAPACITY) {
            config.memory_capacity = capacity;
        }
        if let Some(secs) = parse_env::<u64>(ENV_SWEEP_SECS) {
            config.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config
    }

    /// Directory of the persistent tiers, `None` if no platform default exists
    #[must_use]
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join(DEFAULT_STORE_NAME)))
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub(crate) fn sqlite_file(&self) -> String {
        format!("{}.sqlite3", self.store_name)
    }

    pub(crate) fn fallback_file(&self) -> String {
        format!("{}.kv.json", self.store_name)
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(var = name, value = %raw, error = %e, "Ignoring invalid cache setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.store_name, "clinic-cache");
        assert_eq!(config.schema_version, 1);
        assert_eq!(config.memory_capacity, 2000);
        assert_eq!(config.fallback_max_bytes, Some(5 * 1024 * 1024));
        assert!(config.sweep_interval.is_none());
        assert_eq!(config.sqlite_file(), "clinic-cache.sqlite3");
        assert_eq!(config.fallback_file(), "clinic-cache.kv.json");
    }

    #[test]
    fn explicit_data_dir_wins() {
        let config = CacheConfig::default().with_data_dir("/tmp/somewhere");
        assert_eq!(config.resolved_data_dir(), Some(PathBuf::from("/tmp/somewhere")));
    }
}
