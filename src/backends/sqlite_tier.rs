//! SQLite Tier - Durable Transactional Backend
//!
//! One database file per store holding two tables, `cache_entries` and
//! `cache_tags`, plus a `cache_meta` table recording the schema version.
//! Blocking SQLite calls run on Tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::TierError;
use crate::traits::{StorageTier, Table, TierKind};

const TIER_NAME: &str = "SQLite";

/// Durable tier backed by an embedded SQLite database
pub struct SqliteTier {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteTier {
    /// Open (or create) the database at `path`
    ///
    /// If the stored schema version differs from `schema_version`, both cache
    /// tables are dropped and recreated: cached data is always re-fetchable.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// initialized.
    pub fn open(path: impl AsRef<Path>, schema_version: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set SQLite pragmas")?;

        let wiped = initialize_schema(&mut conn, schema_version)
            .context("Failed to initialize cache schema")?;
        info!(
            path = %path.display(),
            schema_version,
            wiped,
            "SQLite tier opened"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database, mainly for tests
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn in_memory(schema_version: u32) -> Result<Self> {
        let mut conn =
            Connection::open_in_memory().context("Failed to create in-memory cache database")?;
        initialize_schema(&mut conn, schema_version).context("Failed to initialize cache schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<R, F>(&self, op: F) -> Result<R, TierError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        })
        .await
        .map_err(|e| TierError::Unavailable {
            tier: TIER_NAME,
            reason: e.to_string(),
        })?;
        Ok(result?)
    }
}

/// Create tables, wiping them on a schema version change
///
/// Returns `true` when existing tables were dropped.
fn initialize_schema(conn: &mut Connection, schema_version: u32) -> rusqlite::Result<bool> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS cache_meta (name TEXT PRIMARY KEY, value INTEGER NOT NULL);",
    )?;

    let stored: Option<u32> = tx
        .query_row(
            "SELECT value FROM cache_meta WHERE name = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let wiped = stored.is_some_and(|version| version != schema_version);
    if wiped {
        tx.execute_batch("DROP TABLE IF EXISTS cache_entries; DROP TABLE IF EXISTS cache_tags;")?;
    }
    if stored != Some(schema_version) {
        tx.execute(
            "INSERT OR REPLACE INTO cache_meta (name, value) VALUES ('schema_version', ?1)",
            params![schema_version],
        )?;
    }

    tx.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS cache_tags (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );
        ",
    )?;
    tx.commit()?;
    Ok(wiped)
}

#[async_trait]
impl StorageTier for SqliteTier {
    async fn read_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", table.as_str()),
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
        })
        .await
    }

    async fn write_raw(&self, table: Table, key: &str, value: &[u8]) -> Result<(), TierError> {
        let owned_key = key.to_string();
        let value = value.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                    table.as_str()
                ),
                params![owned_key, value],
            )
        })
        .await?;
        debug!(key = %key, table = table.as_str(), "[SQLite] Stored key");
        Ok(())
    }

    async fn delete_raw(&self, table: Table, key: &str) -> Result<(), TierError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE key = ?1", table.as_str()),
                params![key],
            )
        })
        .await?;
        Ok(())
    }

    async fn clear_all(&self, table: Table) -> Result<(), TierError> {
        self.with_conn(move |conn| conn.execute(&format!("DELETE FROM {}", table.as_str()), []))
            .await?;
        Ok(())
    }

    async fn iterate_keys(&self, table: Table) -> Result<Vec<String>, TierError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT key FROM {}", table.as_str()))?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>();
            keys
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .is_ok()
    }

    fn name(&self) -> &'static str {
        TIER_NAME
    }

    fn kind(&self) -> TierKind {
        TierKind::Durable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.sqlite3");

        {
            let tier = SqliteTier::open(&path, 1).unwrap();
            tier.write_raw(Table::Entries, "patient:1", b"{}").await.unwrap();
            tier.write_raw(Table::Tags, "patients", b"[]").await.unwrap();
        }

        let tier = SqliteTier::open(&path, 1).unwrap();
        assert_eq!(
            tier.read_raw(Table::Entries, "patient:1").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(tier.iterate_keys(Table::Tags).await.unwrap(), vec!["patients"]);
    }

    #[tokio::test]
    async fn schema_bump_wipes_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.sqlite3");

        {
            let tier = SqliteTier::open(&path, 1).unwrap();
            tier.write_raw(Table::Entries, "k", b"v").await.unwrap();
        }

        let tier = SqliteTier::open(&path, 2).unwrap();
        assert_eq!(tier.read_raw(Table::Entries, "k").await.unwrap(), None);
        assert!(tier.iterate_keys(Table::Entries).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overwrite_and_clear() {
        let tier = SqliteTier::in_memory(1).unwrap();
        tier.write_raw(Table::Entries, "k", b"one").await.unwrap();
        tier.write_raw(Table::Entries, "k", b"two").await.unwrap();
        assert_eq!(
            tier.read_raw(Table::Entries, "k").await.unwrap(),
            Some(b"two".to_vec())
        );

        tier.write_raw(Table::Tags, "t", b"[]").await.unwrap();
        tier.clear_all(Table::Entries).await.unwrap();
        assert!(tier.iterate_keys(Table::Entries).await.unwrap().is_empty());
        assert_eq!(tier.iterate_keys(Table::Tags).await.unwrap(), vec!["t"]);
        assert!(tier.health_check().await);
    }
}
