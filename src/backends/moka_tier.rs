//! Moka Tier - Volatile In-Memory Backend
//!
//! Fastest tier, holds hot entries for the lifetime of the process.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use tracing::{debug, info};

use crate::error::TierError;
use crate::traits::{StorageTier, Table, TierKind};

/// Configuration for [`MokaTier`]
#[derive(Debug, Clone, Copy)]
pub struct MokaTierConfig {
    /// Max number of entries before LRU-style eviction kicks in
    pub max_capacity: u64,
}

impl Default for MokaTierConfig {
    fn default() -> Self {
        Self { max_capacity: 2000 }
    }
}

/// In-process volatile tier backed by Moka
///
/// - Entries live in a bounded Moka cache; evicting one only costs a
///   fallback read from a persistent tier.
/// - Tag records live in an unbounded `DashMap`, they are small and must not
///   be evicted while the process owns the only copy.
/// - Expiry is not delegated to Moka: entry TTLs are evaluated by the manager
///   from the encoded timestamp.
pub struct MokaTier {
    entries: Cache<String, Arc<[u8]>>,
    tags: DashMap<String, Arc<[u8]>>,
}

impl MokaTier {
    #[must_use]
    pub fn new(config: MokaTierConfig) -> Self {
        info!(capacity = config.max_capacity, "Initializing Moka memory tier");

        Self {
            entries: Cache::builder().max_capacity(config.max_capacity).build(),
            tags: DashMap::new(),
        }
    }

    /// Number of entries currently held (approximate while evictions are pending)
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

impl Default for MokaTier {
    fn default() -> Self {
        Self::new(MokaTierConfig::default())
    }
}

#[async_trait]
impl StorageTier for MokaTier {
    async fn read_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        let value = match table {
            Table::Entries => self.entries.get(key).await,
            Table::Tags => self.tags.get(key).map(|record| Arc::clone(record.value())),
        };
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn write_raw(&self, table: Table, key: &str, value: &[u8]) -> Result<(), TierError> {
        let bytes: Arc<[u8]> = Arc::from(value);
        match table {
            Table::Entries => self.entries.insert(key.to_string(), bytes).await,
            Table::Tags => {
                self.tags.insert(key.to_string(), bytes);
            }
        }
        debug!(key = %key, table = table.as_str(), "[Moka] Stored key");
        Ok(())
    }

    async fn delete_raw(&self, table: Table, key: &str) -> Result<(), TierError> {
        match table {
            Table::Entries => self.entries.invalidate(key).await,
            Table::Tags => {
                self.tags.remove(key);
            }
        }
        Ok(())
    }

    async fn clear_all(&self, table: Table) -> Result<(), TierError> {
        match table {
            Table::Entries => {
                self.entries.invalidate_all();
                self.entries.run_pending_tasks().await;
            }
            Table::Tags => self.tags.clear(),
        }
        Ok(())
    }

    async fn iterate_keys(&self, table: Table) -> Result<Vec<String>, TierError> {
        let keys = match table {
            Table::Entries => self
                .entries
                .iter()
                .map(|(key, _)| key.as_ref().clone())
                .collect(),
            Table::Tags => self.tags.iter().map(|record| record.key().clone()).collect(),
        };
        Ok(keys)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Moka"
    }

    fn kind(&self) -> TierKind {
        TierKind::Volatile
    }
}
