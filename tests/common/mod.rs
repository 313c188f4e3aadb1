//! Common utilities for integration tests
//!
//! Shared infrastructure:
//! - Manager constructors over memory-only and on-disk tiers
//! - A tier that always fails, for fallback paths
//! - A tier that holds one write open, for concurrent mutations
//! - Test data generators

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use clinic_cache::{
    CacheManager, FileKvTier, ManualClock, MokaTier, SqliteTier, StorageTier, Table, TierError,
    TierKind, async_trait,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

/// Fixed start time for manual clocks, 2025-01-01T00:00:00Z
pub const START_MILLIS: u64 = 1_735_689_600_000;

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

pub fn manual_clock() -> ManualClock {
    ManualClock::new(START_MILLIS)
}

/// Manager over a single Moka tier
pub async fn setup_memory_manager(clock: &ManualClock) -> Arc<CacheManager> {
    let tiers: Vec<Arc<dyn StorageTier>> = vec![Arc::new(MokaTier::default())];
    Arc::new(CacheManager::new(tiers, Arc::new(clock.clone())).await.unwrap())
}

/// The default persistent tiers stored under `dir`
pub fn open_disk_tiers(dir: &Path) -> (Arc<SqliteTier>, Arc<FileKvTier>) {
    let sqlite = SqliteTier::open(dir.join("cache.sqlite3"), 1).unwrap();
    let file_kv = FileKvTier::open(dir.join("cache.kv.json"), 1, None).unwrap();
    (Arc::new(sqlite), Arc::new(file_kv))
}

/// Manager over Moka + SQLite + file fallback stored under `dir`
///
/// Calling it twice with the same `dir` simulates an application restart.
pub async fn setup_disk_manager(dir: &Path, clock: &ManualClock) -> Arc<CacheManager> {
    let (sqlite, file_kv) = open_disk_tiers(dir);
    let tiers: Vec<Arc<dyn StorageTier>> = vec![Arc::new(MokaTier::default()), sqlite, file_kv];
    Arc::new(CacheManager::new(tiers, Arc::new(clock.clone())).await.unwrap())
}

/// Durable tier whose every operation fails
#[derive(Debug, Default)]
pub struct FailingTier;

impl FailingTier {
    fn error() -> TierError {
        TierError::Unavailable {
            tier: "Failing",
            reason: "disk detached".to_string(),
        }
    }
}

#[async_trait]
impl StorageTier for FailingTier {
    async fn read_raw(&self, _table: Table, _key: &str) -> Result<Option<Vec<u8>>, TierError> {
        Err(Self::error())
    }

    async fn write_raw(&self, _table: Table, _key: &str, _value: &[u8]) -> Result<(), TierError> {
        Err(Self::error())
    }

    async fn delete_raw(&self, _table: Table, _key: &str) -> Result<(), TierError> {
        Err(Self::error())
    }

    async fn clear_all(&self, _table: Table) -> Result<(), TierError> {
        Err(Self::error())
    }

    async fn iterate_keys(&self, _table: Table) -> Result<Vec<String>, TierError> {
        Err(Self::error())
    }

    fn name(&self) -> &'static str {
        "Failing"
    }

    fn kind(&self) -> TierKind {
        TierKind::Durable
    }
}

/// Wraps a tier and can hold the next write to one table open
///
/// After [`arm`](Self::arm), the next write to that table signals
/// [`entered`](Self::entered) and waits for [`release`](Self::release).
pub struct GatedTier {
    inner: Arc<dyn StorageTier>,
    armed: Mutex<Option<Table>>,
    entered: Notify,
    release: Semaphore,
}

impl GatedTier {
    pub fn new(inner: Arc<dyn StorageTier>) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    pub fn arm(&self, table: Table) {
        *self.armed.lock() = Some(table);
    }

    /// Resolves once the held write has started
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl StorageTier for GatedTier {
    async fn read_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        self.inner.read_raw(table, key).await
    }

    async fn write_raw(&self, table: Table, key: &str, value: &[u8]) -> Result<(), TierError> {
        let hold = {
            let mut armed = self.armed.lock();
            if *armed == Some(table) {
                *armed = None;
                true
            } else {
                false
            }
        };
        if hold {
            self.entered.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
        self.inner.write_raw(table, key, value).await
    }

    async fn delete_raw(&self, table: Table, key: &str) -> Result<(), TierError> {
        self.inner.delete_raw(table, key).await
    }

    async fn clear_all(&self, table: Table) -> Result<(), TierError> {
        self.inner.clear_all(table).await
    }

    async fn iterate_keys(&self, table: Table) -> Result<Vec<String>, TierError> {
        self.inner.iterate_keys(table).await
    }

    fn name(&self) -> &'static str {
        "Gated"
    }

    fn kind(&self) -> TierKind {
        self.inner.kind()
    }
}

/// Manager over Moka in front of a gated in-memory SQLite tier
pub async fn setup_gated_manager(clock: &ManualClock) -> (Arc<CacheManager>, Arc<GatedTier>) {
    let sqlite: Arc<dyn StorageTier> = Arc::new(SqliteTier::in_memory(1).unwrap());
    let gated = Arc::new(GatedTier::new(sqlite));
    let held: Arc<dyn StorageTier> = gated.clone();
    let tiers: Vec<Arc<dyn StorageTier>> = vec![Arc::new(MokaTier::default()), held];
    let manager = CacheManager::new(tiers, Arc::new(clock.clone())).await.unwrap();
    (Arc::new(manager), gated)
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize, Serializer};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Patient {
        pub id: u64,
        pub name: String,
        pub phone: String,
    }

    impl Patient {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("Patient {}", id),
                phone: format!("+1-555-{:04}", id),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Appointment {
        pub id: u64,
        pub patient_id: u64,
        pub slot: String,
    }

    impl Appointment {
        pub fn new(id: u64, patient_id: u64) -> Self {
            Self {
                id,
                patient_id,
                slot: format!("2025-01-{:02}T09:00", id % 28 + 1),
            }
        }
    }

    pub fn patients(count: u64) -> Vec<Patient> {
        (1..=count).map(Patient::new).collect()
    }

    /// Payload that can be told to fail serialization
    #[derive(Debug, Clone)]
    pub struct Flaky {
        pub value: u32,
        pub fail: bool,
    }

    impl Serialize for Flaky {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            if self.fail {
                return Err(serde::ser::Error::custom("refusing to serialize"));
            }
            serializer.serialize_u32(self.value)
        }
    }
}

/// Wait for an async condition with timeout
pub async fn wait_for<F, Fut>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    use tokio::time::{Duration, sleep};

    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("patient");
        let key2 = test_key("patient");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_patient_"));
    }

    #[test]
    fn test_data_generation() {
        let patient = test_data::Patient::new(7);
        assert_eq!(patient.name, "Patient 7");
        assert_eq!(patient.phone, "+1-555-0007");
    }
}
