//! Clinic Cache
//!
//! A client-side multi-tier cache sitting between data-fetching code and a
//! remote source of truth:
//! - **Memory tier**: Moka, fastest, lost on restart
//! - **Durable tier**: embedded SQLite, survives restart
//! - **Fallback tier**: a single JSON file, used when SQLite is unavailable
//! - **TTL expiry**: evaluated lazily on read from the stored timestamp
//! - **Tag invalidation**: a persisted tag index clears related entries in one
//!   call
//! - **Read-through helpers**: fetch on miss, fire-and-forget prefetch, warm-up
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use clinic_cache::{CacheStrategy, CacheSystem, SetOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystem::new().await?;
//!     let manager = cache.cache_manager();
//!
//!     let options = SetOptions::new()
//!         .with_strategy(CacheStrategy::Medium)
//!         .with_tags(["patients"]);
//!     manager.set_cache("patients:list", &vec!["alice", "bob"], options).await?;
//!
//!     let cached: Option<Vec<String>> = manager.get_cache("patients:list").await;
//!     tracing::info!(?cached, "Read back");
//!
//!     // A patient was edited: drop everything derived from the patient list
//!     manager.clear_by_tags(&["patients"]).await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! get → Memory → SQLite → FileKv → miss
//!       ↓ hit    ↓ hit    ↓ hit
//!       return   promote  promote
//!
//! set → Memory + first persistent tier that accepts the write
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub mod backends;
pub mod builder;
pub mod cache_manager;
pub mod clock;
pub mod codecs;
pub mod config;
pub mod entry;
pub mod error;
pub mod fetch;
mod key_gate;
pub mod stats;
pub mod sweeper;
pub mod tag_index;
pub mod traits;

pub use backends::{FileKvTier, MokaTier, MokaTierConfig, SqliteTier};
pub use builder::CacheSystemBuilder;
pub use cache_manager::{BatchResult, CacheManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codecs::EntryCodec;
pub use config::CacheConfig;
pub use entry::{BatchEntry, CacheEntry, CacheStrategy, SetOptions};
pub use error::{CacheError, TierError};
pub use fetch::FetchResult;
pub use stats::{CacheHealth, CacheManagerStats, CacheStats, HealthStatus};
pub use sweeper::Sweeper;
pub use tag_index::TagIndex;
pub use traits::{StorageTier, Table, TierKind};

// Re-export async_trait for custom tier implementations
pub use async_trait::async_trait;

/// Main entry point for the cache
///
/// Owns the [`CacheManager`] and, when configured, the background sweeper.
///
/// # Example
///
/// ```rust,no_run
/// use clinic_cache::CacheSystem;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let cache = CacheSystem::new().await?;
///
///     // Use cache_manager for all operations
///     let manager = cache.cache_manager();
///
///     Ok(())
/// }
/// ```
pub struct CacheSystem {
    /// Unified cache manager (primary interface)
    pub cache_manager: Arc<CacheManager>,
    sweeper: Option<Sweeper>,
}

impl CacheSystem {
    /// Create a cache system with the default tiers
    ///
    /// # Configuration
    ///
    /// Read from `CLINIC_CACHE_*` environment variables, see
    /// [`CacheConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Returns an error if the cache manager cannot be created.
    pub async fn new() -> Result<Self> {
        info!("Initializing cache system");
        CacheSystemBuilder::new()
            .with_config(CacheConfig::from_env())
            .build()
            .await
    }

    /// Memory-only cache system, nothing touches the disk
    ///
    /// # Errors
    ///
    /// Returns an error if the cache manager cannot be created.
    pub async fn in_memory() -> Result<Self> {
        CacheSystemBuilder::new().without_persistence().build().await
    }

    pub(crate) fn from_parts(cache_manager: Arc<CacheManager>, sweeper: Option<Sweeper>) -> Self {
        Self {
            cache_manager,
            sweeper,
        }
    }

    /// Get reference to cache manager (primary interface)
    #[must_use]
    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache_manager
    }

    /// Whether the sweeper task is running
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.as_ref().is_some_and(Sweeper::is_running)
    }

    /// Check every tier, `true` only if all of them respond
    pub async fn health_check(&self) -> bool {
        let report = self.cache_manager.tier_health().await;
        let healthy = report.iter().all(|(_, ok)| *ok);
        if !healthy {
            let failing: Vec<&str> = report
                .iter()
                .filter(|(_, ok)| !ok)
                .map(|(name, _)| *name)
                .collect();
            tracing::warn!(tiers = ?failing, "Cache health check failed");
        }
        healthy
    }

    /// Stop the background sweeper, if any
    pub async fn shutdown(&mut self) {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop().await;
        }
        info!("Cache system shut down");
    }
}
