//! File KV Tier - Synchronous Fallback Backend
//!
//! A string-only key-value store persisted as a single JSON file, in the
//! spirit of browser `localStorage`. Used when the durable tier fails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TierError;
use crate::traits::{StorageTier, Table, TierKind};

const TIER_NAME: &str = "FileKv";

/// On-disk layout, one map per logical table
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct KvFile {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    entries: BTreeMap<String, String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl KvFile {
    fn empty(schema_version: u32) -> Self {
        Self {
            schema_version,
            ..Self::default()
        }
    }

    fn table(&self, table: Table) -> &BTreeMap<String, String> {
        match table {
            Table::Entries => &self.entries,
            Table::Tags => &self.tags,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut BTreeMap<String, String> {
        match table {
            Table::Entries => &mut self.entries,
            Table::Tags => &mut self.tags,
        }
    }

    fn byte_size(&self) -> usize {
        self.entries
            .iter()
            .chain(self.tags.iter())
            .map(|(key, value)| key.len() + value.len())
            .sum()
    }
}

/// Synchronous file-backed fallback tier
///
/// The whole store is kept in memory and rewritten atomically (temp file +
/// rename) on every mutation. Every operation completes without suspending.
pub struct FileKvTier {
    path: PathBuf,
    state: Mutex<KvFile>,
    max_bytes: Option<usize>,
}

impl FileKvTier {
    /// Open the store at `path`, starting empty if the file is missing
    ///
    /// An unreadable file, or one written with another `schema_version`, is
    /// discarded; the cache can always be rebuilt from the source of truth.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn open(
        path: impl AsRef<Path>,
        schema_version: u32,
        max_bytes: Option<usize>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
        }

        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<KvFile>(&bytes) {
                Ok(state) if state.schema_version == schema_version => state,
                Ok(state) => {
                    info!(
                        path = %path.display(),
                        stored = state.schema_version,
                        schema_version,
                        "Schema version changed, discarding fallback store"
                    );
                    KvFile::empty(schema_version)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable fallback store");
                    KvFile::empty(schema_version)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => KvFile::empty(schema_version),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        info!(
            path = %path.display(),
            entries = state.entries.len(),
            "File KV tier opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
            max_bytes,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes used by keys and values, the figure the quota is checked against
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.state.lock().byte_size()
    }

    fn persist(&self, state: &KvFile) -> Result<(), TierError> {
        let content = serde_json::to_vec(state).map_err(|e| TierError::Corrupt {
            tier: TIER_NAME,
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `mutate`, persist, and roll back the in-memory state on failure
    fn mutate<F>(&self, mutate: F) -> Result<(), TierError>
    where
        F: FnOnce(&mut KvFile) -> Result<(), TierError>,
    {
        let mut state = self.state.lock();
        let previous = state.clone();
        mutate(&mut state)?;
        if let Err(e) = self.persist(&state) {
            *state = previous;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageTier for FileKvTier {
    async fn read_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        let state = self.state.lock();
        Ok(state
            .table(table)
            .get(key)
            .map(|value| value.as_bytes().to_vec()))
    }

    async fn write_raw(&self, table: Table, key: &str, value: &[u8]) -> Result<(), TierError> {
        let value = String::from_utf8(value.to_vec()).map_err(|_| TierError::Encoding {
            key: key.to_string(),
        })?;
        let max_bytes = self.max_bytes;

        self.mutate(|state| {
            if let Some(limit) = max_bytes {
                let replaced = state
                    .table(table)
                    .get(key)
                    .map_or(0, |old| key.len() + old.len());
                let needed = state.byte_size() - replaced + key.len() + value.len();
                if needed > limit {
                    return Err(TierError::QuotaExceeded {
                        tier: TIER_NAME,
                        needed,
                        limit,
                    });
                }
            }
            state.table_mut(table).insert(key.to_string(), value);
            Ok(())
        })?;

        debug!(key = %key, table = table.as_str(), "[FileKv] Stored key");
        Ok(())
    }

    async fn delete_raw(&self, table: Table, key: &str) -> Result<(), TierError> {
        if !self.state.lock().table(table).contains_key(key) {
            return Ok(());
        }
        self.mutate(|state| {
            state.table_mut(table).remove(key);
            Ok(())
        })
    }

    async fn clear_all(&self, table: Table) -> Result<(), TierError> {
        self.mutate(|state| {
            state.table_mut(table).clear();
            Ok(())
        })
    }

    async fn iterate_keys(&self, table: Table) -> Result<Vec<String>, TierError> {
        Ok(self.state.lock().table(table).keys().cloned().collect())
    }

    async fn health_check(&self) -> bool {
        let state = self.state.lock();
        self.persist(&state).is_ok()
    }

    fn name(&self) -> &'static str {
        TIER_NAME
    }

    fn kind(&self) -> TierKind {
        TierKind::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.kv.json");

        {
            let tier = FileKvTier::open(&path, 1, None).unwrap();
            tier.write_raw(Table::Entries, "k", b"{\"a\":1}").await.unwrap();
        }

        let tier = FileKvTier::open(&path, 1, None).unwrap();
        assert_eq!(
            tier.read_raw(Table::Entries, "k").await.unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );
    }

    #[tokio::test]
    async fn quota_rejects_oversized_write() {
        let dir = TempDir::new().unwrap();
        let tier = FileKvTier::open(dir.path().join("kv.json"), 1, Some(16)).unwrap();

        tier.write_raw(Table::Entries, "k", b"12345").await.unwrap();
        let err = tier
            .write_raw(Table::Entries, "big", b"0123456789abcdef")
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::QuotaExceeded { limit: 16, .. }));

        // replacing a value only counts the difference
        tier.write_raw(Table::Entries, "k", b"123456789").await.unwrap();
        assert_eq!(tier.used_bytes(), 10);
        assert_eq!(tier.read_raw(Table::Entries, "big").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_non_utf8() {
        let dir = TempDir::new().unwrap();
        let tier = FileKvTier::open(dir.path().join("kv.json"), 1, None).unwrap();
        let err = tier
            .write_raw(Table::Entries, "k", &[0xff, 0xfe])
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Encoding { .. }));
    }

    #[tokio::test]
    async fn schema_bump_discards_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.json");

        {
            let tier = FileKvTier::open(&path, 1, None).unwrap();
            tier.write_raw(Table::Entries, "k", b"v").await.unwrap();
            tier.write_raw(Table::Tags, "t", b"[]").await.unwrap();
        }

        let tier = FileKvTier::open(&path, 2, None).unwrap();
        assert!(tier.iterate_keys(Table::Entries).await.unwrap().is_empty());
        assert!(tier.iterate_keys(Table::Tags).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.json");
        std::fs::write(&path, b"not json").unwrap();

        let tier = FileKvTier::open(&path, 1, None).unwrap();
        assert!(tier.iterate_keys(Table::Entries).await.unwrap().is_empty());
    }
}
