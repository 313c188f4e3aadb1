//! Cache System Builder
//!
//! Assembles the tier list, clock and sweeper behind a [`CacheSystem`].
//!
//! # Example: Default Tiers
//!
//! ```rust,no_run
//! use clinic_cache::{CacheConfig, CacheSystemBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystemBuilder::new()
//!         .with_config(CacheConfig::from_env())
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Persistent Tier
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clinic_cache::CacheSystemBuilder;
//!
//! let cache = CacheSystemBuilder::new()
//!     .with_tier(Arc::new(MyEncryptedStore::open()?))
//!     .build()
//!     .await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::backends::{FileKvTier, MokaTier, MokaTierConfig, SqliteTier};
use crate::cache_manager::CacheManager;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::sweeper::Sweeper;
use crate::traits::StorageTier;
use crate::CacheSystem;

/// Builder for [`CacheSystem`]
///
/// # Default Behavior
///
/// Without custom tiers, `build()` assembles, fastest first:
/// - **Moka** memory tier
/// - **SQLite** durable tier at `<data_dir>/<store_name>.sqlite3`
/// - **File KV** fallback tier at `<data_dir>/<store_name>.kv.json`
///
/// A persistent tier that cannot be opened is skipped with a warning; the
/// cache then runs with whatever tiers remain.
pub struct CacheSystemBuilder {
    config: CacheConfig,
    memory_tier: Option<Arc<dyn StorageTier>>,
    custom_tiers: Vec<Arc<dyn StorageTier>>,
    clock: Option<Arc<dyn Clock>>,
    persistence: bool,
}

impl CacheSystemBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            memory_tier: None,
            custom_tiers: Vec::new(),
            clock: None,
            persistence: true,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default Moka tier at the head of the list
    #[must_use]
    pub fn with_memory_tier(mut self, tier: Arc<dyn StorageTier>) -> Self {
        self.memory_tier = Some(tier);
        self
    }

    /// Append a tier after the memory tier, in priority order
    ///
    /// Once any custom tier is given, the default persistent tiers are not
    /// opened.
    #[must_use]
    pub fn with_tier(mut self, tier: Arc<dyn StorageTier>) -> Self {
        self.custom_tiers.push(tier);
        self
    }

    /// Time source used for entry timestamps and expiry
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Skip the default persistent tiers, keeping only memory and custom tiers
    #[must_use]
    pub fn without_persistence(mut self) -> Self {
        self.persistence = false;
        self
    }

    /// Build the `CacheSystem`
    ///
    /// # Errors
    ///
    /// Returns an error if the cache manager cannot be created.
    pub async fn build(self) -> Result<CacheSystem> {
        info!(store = %self.config.store_name, "Building cache system");

        let memory = self.memory_tier.unwrap_or_else(|| {
            Arc::new(MokaTier::new(MokaTierConfig {
                max_capacity: self.config.memory_capacity,
            }))
        });

        let mut tiers = vec![memory];
        if !self.custom_tiers.is_empty() {
            tiers.extend(self.custom_tiers);
        } else if self.persistence {
            tiers.extend(open_default_tiers(&self.config));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache_manager = Arc::new(CacheManager::new(tiers, clock).await?);

        let sweeper = self
            .config
            .sweep_interval
            .map(|interval| Sweeper::start(Arc::clone(&cache_manager), interval));

        info!("Cache system built successfully");
        Ok(CacheSystem::from_parts(cache_manager, sweeper))
    }
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn open_default_tiers(config: &CacheConfig) -> Vec<Arc<dyn StorageTier>> {
    let Some(dir) = config.resolved_data_dir() else {
        warn!("No data directory available, running without persistent tiers");
        return Vec::new();
    };

    let mut tiers: Vec<Arc<dyn StorageTier>> = Vec::new();

    match SqliteTier::open(dir.join(config.sqlite_file()), config.schema_version) {
        Ok(tier) => tiers.push(Arc::new(tier)),
        Err(e) => warn!(error = %format!("{e:#}"), "Durable tier unavailable, skipping"),
    }

    match open_fallback(&dir, config) {
        Ok(tier) => tiers.push(Arc::new(tier)),
        Err(e) => warn!(error = %format!("{e:#}"), "Fallback tier unavailable, skipping"),
    }

    tiers
}

fn open_fallback(dir: &Path, config: &CacheConfig) -> Result<FileKvTier> {
    FileKvTier::open(
        dir.join(config.fallback_file()),
        config.schema_version,
        config.fallback_max_bytes,
    )
}
