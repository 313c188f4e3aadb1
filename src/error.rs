//! Error types
//!
//! Only [`CacheError::Serialization`] ever reaches a caller of the write API.
//! Tier failures are recovered inside the manager and fetch failures are
//! swallowed by the read-through helpers; both are still typed so they can be
//! logged with context.

use thiserror::Error;

/// Errors surfaced by cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The payload could not be encoded for storage
    #[error("failed to serialize cache entry '{key}': {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },

    /// A caller-supplied fetcher failed
    #[error("fetcher failed: {0:#}")]
    Fetch(anyhow::Error),
}

/// Failure of a single storage tier
///
/// Never returned from the public manager API: the manager logs it and moves
/// on to the next tier.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("tier '{tier}' is unavailable: {reason}")]
    Unavailable { tier: &'static str, reason: String },

    #[error("tier '{tier}' quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded {
        tier: &'static str,
        needed: usize,
        limit: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt data in tier '{tier}': {reason}")]
    Corrupt { tier: &'static str, reason: String },

    #[error("value for '{key}' is not valid UTF-8")]
    Encoding { key: String },
}
