//! Storage Tier Trait
//!
//! Every backend participating in the cache implements [`StorageTier`]. Tiers
//! only move opaque bytes; encoding, expiry and tag bookkeeping live in the
//! manager.
//!
//! # Example: Custom Tier
//!
//! ```rust,ignore
//! use clinic_cache::{StorageTier, Table, TierError, TierKind, async_trait};
//!
//! struct MyStore { /* ... */ }
//!
//! #[async_trait]
//! impl StorageTier for MyStore {
//!     async fn read_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, TierError> {
//!         // Your implementation
//!     }
//!
//!     // ... the remaining operations
//!
//!     fn name(&self) -> &'static str {
//!         "MyStore"
//!     }
//!
//!     fn kind(&self) -> TierKind {
//!         TierKind::Durable
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::TierError;

/// Logical table inside a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Encoded cache entries keyed by cache key
    Entries,
    /// Tag reverse-index records keyed by tag
    Tags,
}

impl Table {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entries => "cache_entries",
            Self::Tags => "cache_tags",
        }
    }
}

/// Role of a tier in the fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    /// In-process, lost on restart
    Volatile,
    /// Transactional local store, survives restart
    Durable,
    /// Simple synchronous store used when the durable one fails
    Fallback,
}

impl TierKind {
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        !matches!(self, Self::Volatile)
    }
}

/// Byte-level storage backend
///
/// Tiers differ only in medium and synchronicity, never in semantics:
/// writing a key replaces it, deleting an absent key succeeds, and
/// `iterate_keys` reflects every key currently stored in the table.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`, the manager is shared across tasks.
#[async_trait]
pub trait StorageTier: Send + Sync {
    /// Read the raw value of `key`
    ///
    /// * `Ok(Some(bytes))` - key is stored
    /// * `Ok(None)` - key is absent
    /// * `Err(e)` - tier failure
    async fn read_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, TierError>;

    /// Store `value` under `key`, replacing any previous value
    async fn write_raw(&self, table: Table, key: &str, value: &[u8]) -> Result<(), TierError>;

    /// Remove `key`, succeeding when it was absent
    async fn delete_raw(&self, table: Table, key: &str) -> Result<(), TierError>;

    /// Remove every key of the table
    async fn clear_all(&self, table: Table) -> Result<(), TierError>;

    /// List the keys currently stored in the table
    async fn iterate_keys(&self, table: Table) -> Result<Vec<String>, TierError>;

    /// Check that the tier can serve requests
    async fn health_check(&self) -> bool {
        self.iterate_keys(Table::Tags).await.is_ok()
    }

    /// Name used in logs
    fn name(&self) -> &'static str;

    fn kind(&self) -> TierKind;
}
