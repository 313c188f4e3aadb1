//! Storage Tier Implementations
//!
//! # Available Tiers
//!
//! - **Moka** - volatile in-process tier, fastest, lost on restart
//! - **SQLite** - durable transactional tier, survives restart
//! - **`FileKv`** - synchronous JSON-file tier, used when SQLite fails
//!
//! # Usage
//!
//! ```rust,no_run
//! use clinic_cache::backends::{FileKvTier, MokaTier, SqliteTier};
//!
//! # fn example() -> anyhow::Result<()> {
//! let memory = MokaTier::default();
//! let durable = SqliteTier::open("/tmp/clinic-cache/clinic-cache.sqlite3", 1)?;
//! let fallback = FileKvTier::open("/tmp/clinic-cache/clinic-cache.kv.json", 1, Some(5 * 1024 * 1024))?;
//! # Ok(())
//! # }
//! ```

pub mod file_kv_tier;
pub mod moka_tier;
pub mod sqlite_tier;

pub use file_kv_tier::FileKvTier;
pub use moka_tier::{MokaTier, MokaTierConfig};
pub use sqlite_tier::SqliteTier;
