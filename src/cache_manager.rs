//! Cache Manager - Unified Cache Operations
//!
//! Orchestrates reads and writes across an ordered list of storage tiers:
//! - Reads walk the tiers from fastest to slowest and promote hits upward.
//! - Writes go to every volatile tier and to the first persistent tier that
//!   accepts them.
//! - Expiry is evaluated on read from the encoded timestamp; expired entries
//!   are reported as absent and purged.
//! - Tier failures are logged and skipped, never returned to the caller.
//! - Mutations of one key are serialized by its write gate, so its tag
//!   memberships always cover the entry that is stored.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};
use futures_util::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::codecs::EntryCodec;
use crate::entry::{BatchEntry, CacheEntry, SetOptions};
use crate::error::{CacheError, TierError};
use crate::key_gate::KeyGates;
use crate::tag_index::TagIndex;
use crate::traits::{StorageTier, Table};

/// Outcome of a batch write
///
/// Every entry is attempted; failures are reported per key.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: usize,
    pub failures: Vec<(String, CacheError)>,
}

impl BatchResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(key, _)| key.as_str())
    }
}

/// Hit/miss and operation counters
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) total_requests: AtomicU64,
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) promotions: AtomicU64,
    pub(crate) sets: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) errors: AtomicU64,
}

/// Cache Manager - unified operations across all tiers
pub struct CacheManager {
    /// Tiers in priority order, fastest first
    tiers: Vec<Arc<dyn StorageTier>>,
    tag_index: TagIndex,
    codec: EntryCodec,
    clock: Arc<dyn Clock>,
    gates: KeyGates,
    pub(crate) counters: Counters,
}

impl CacheManager {
    /// Create a manager over `tiers`, given fastest first
    ///
    /// The tag index is restored from the persistent tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if `tiers` is empty.
    pub async fn new(tiers: Vec<Arc<dyn StorageTier>>, clock: Arc<dyn Clock>) -> Result<Self> {
        if tiers.is_empty() {
            bail!("CacheManager needs at least one storage tier");
        }

        let names: Vec<&'static str> = tiers.iter().map(|tier| tier.name()).collect();
        info!(tiers = ?names, "Initializing Cache Manager");

        let persistent: Vec<Arc<dyn StorageTier>> = tiers
            .iter()
            .filter(|tier| tier.kind().is_persistent())
            .cloned()
            .collect();
        let tag_index = TagIndex::load(persistent).await;

        Ok(Self {
            tiers,
            tag_index,
            codec: EntryCodec,
            clock,
            gates: KeyGates::default(),
            counters: Counters::default(),
        })
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub(crate) fn tiers(&self) -> &[Arc<dyn StorageTier>] {
        &self.tiers
    }

    pub(crate) fn codec(&self) -> &EntryCodec {
        &self.codec
    }

    pub(crate) fn tag_index(&self) -> &TagIndex {
        &self.tag_index
    }

    /// Store `data` under `key`
    ///
    /// When `options.invalidate_with_tags` is set, every other entry
    /// carrying one of those tags is removed once the new value is stored.
    /// Readers see the old group, the new value, or briefly both, never
    /// neither. `key` itself is kept even if it carries an invalidated tag.
    ///
    /// Concurrent writes to the same key are applied one after the other;
    /// the write that completes last wins.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `data` cannot be encoded.
    /// Nothing is modified in that case.
    pub async fn set_cache<T>(&self, key: &str, data: &T, options: SetOptions) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let (bytes, tags) = {
            let entry = CacheEntry::new(key, data, self.now(), &options);
            (self.codec.encode(&entry)?, entry.tags)
        };

        {
            let _gate = self.gates.lock(key).await;
            self.tag_index.record(key, &tags).await;
            self.write_entry(key, &bytes).await;
        }

        if !options.invalidate_with_tags.is_empty() {
            self.remove_tagged(&options.invalidate_with_tags, Some(key)).await;
        }

        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_ms = ?options.ttl.map(|ttl| ttl.as_millis()), tags = tags.len(), "Cached entry");
        Ok(())
    }

    /// Read `key`, `None` when absent or expired
    ///
    /// A stored value that does not decode as `T` is also reported as
    /// `None`.
    pub async fn get_cache<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = self.now();

        let Some((level, bytes)) = self.locate(key).await else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match self.codec.decode_header(&bytes) {
            Ok(header) if header.is_expired(now) => {
                debug!(key = %key, "Entry expired");
                self.purge(key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable entry");
                self.purge(key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let entry: CacheEntry<T> = match self.codec.decode(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    key = %key,
                    expected = std::any::type_name::<T>(),
                    error = %e,
                    "Cached payload does not match requested type"
                );
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if level > 0 {
            self.promote(level, key, &bytes).await;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.data)
    }

    /// Remove `key` from every tier and from the tag index
    ///
    /// Deleting an absent key is not an error.
    pub async fn delete_cache(&self, key: &str) {
        self.purge(key).await;
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Deleted entry");
    }

    /// Remove every entry and the whole tag index
    pub async fn clear_cache(&self) {
        let _store = self.gates.lock_store().await;
        for tier in &self.tiers {
            if let Err(e) = tier.clear_all(Table::Entries).await {
                self.tier_failed(tier.as_ref(), "clear", "*", &e);
            }
        }
        self.tag_index.clear().await;
        info!("Cache cleared");
    }

    /// Remove every entry carrying at least one of `tags`
    ///
    /// Entries without tags are untouched. Returns the number of keys
    /// removed.
    pub async fn clear_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        self.remove_tagged(tags, None).await
    }

    /// Remove every entry whose key contains `pattern`
    ///
    /// Keys are collected from every tier, so entries that only live in a
    /// persistent tier are matched too. Returns the number of keys removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut keys = BTreeSet::new();
        for tier in &self.tiers {
            match tier.iterate_keys(Table::Entries).await {
                Ok(tier_keys) => keys.extend(tier_keys.into_iter().filter(|key| key.contains(pattern))),
                Err(e) => self.tier_failed(tier.as_ref(), "iterate", "*", &e),
            }
        }
        if keys.is_empty() {
            return 0;
        }

        join_all(keys.iter().map(|key| self.purge(key))).await;

        info!(pattern = %pattern, removed = keys.len(), "Invalidated entries by pattern");
        keys.len()
    }

    async fn remove_tagged<S: AsRef<str>>(&self, tags: &[S], keep: Option<&str>) -> usize {
        let mut keys = self.tag_index.keys_for_tags(tags);
        if let Some(keep) = keep {
            keys.remove(keep);
        }
        if keys.is_empty() {
            return 0;
        }

        join_all(keys.iter().map(|key| self.purge(key))).await;

        let tag_names: Vec<&str> = tags.iter().map(|tag| tag.as_ref()).collect();
        info!(tags = ?tag_names, removed = keys.len(), "Cleared entries by tag");
        keys.len()
    }

    /// Write several entries independently
    ///
    /// A failing entry does not stop the others.
    pub async fn set_multiple_cache<T: Serialize>(&self, entries: &[BatchEntry<T>]) -> BatchResult {
        let results = join_all(entries.iter().map(|entry| async move {
            let outcome = self
                .set_cache(&entry.key, &entry.data, entry.options.clone())
                .await;
            (entry.key.clone(), outcome)
        }))
        .await;

        let mut batch = BatchResult::default();
        for (key, outcome) in results {
            match outcome {
                Ok(()) => batch.succeeded += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Batch write failed for entry");
                    batch.failures.push((key, e));
                }
            }
        }
        batch
    }

    /// Read several keys, omitting absent and expired ones
    pub async fn get_multiple_cache<T, S>(&self, keys: &[S]) -> HashMap<String, T>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let results = join_all(keys.iter().map(|key| async move {
            let key = key.as_ref();
            (key.to_string(), self.get_cache::<T>(key).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect()
    }

    /// Delete several keys
    pub async fn delete_multiple_cache<S: AsRef<str>>(&self, keys: &[S]) {
        join_all(keys.iter().map(|key| self.delete_cache(key.as_ref()))).await;
    }

    /// Tags currently recorded for `key`
    pub fn tags_for_key(&self, key: &str) -> BTreeSet<String> {
        self.tag_index.tags_for_key(key)
    }

    /// Health of each tier as `(name, healthy)`
    pub async fn tier_health(&self) -> Vec<(&'static str, bool)> {
        let checks = join_all(self.tiers.iter().map(|tier| tier.health_check())).await;
        self.tiers
            .iter()
            .map(|tier| tier.name())
            .zip(checks)
            .collect()
    }

    /// First tier holding `key`, with its level and raw bytes
    pub(crate) async fn locate(&self, key: &str) -> Option<(usize, Vec<u8>)> {
        for (level, tier) in self.tiers.iter().enumerate() {
            match tier.read_raw(Table::Entries, key).await {
                Ok(Some(bytes)) => return Some((level, bytes)),
                Ok(None) => {}
                Err(e) => self.tier_failed(tier.as_ref(), "read", key, &e),
            }
        }
        None
    }

    /// Remove the entry from every tier, then its tag memberships
    pub(crate) async fn purge(&self, key: &str) {
        let _gate = self.gates.lock(key).await;
        for tier in &self.tiers {
            if let Err(e) = tier.delete_raw(Table::Entries, key).await {
                self.tier_failed(tier.as_ref(), "delete", key, &e);
            }
        }
        self.tag_index.remove_key(key).await;
    }

    /// Drop the tag memberships of `key` if no tier holds its entry
    ///
    /// Covers entries a tier evicted on its own. A tier that cannot answer
    /// keeps the memberships. Returns whether anything was dropped.
    pub(crate) async fn drop_orphaned_tags(&self, key: &str) -> bool {
        let _gate = self.gates.lock(key).await;
        for tier in &self.tiers {
            if !matches!(tier.read_raw(Table::Entries, key).await, Ok(None)) {
                return false;
            }
        }
        self.tag_index.remove_key(key).await;
        true
    }

    async fn write_entry(&self, key: &str, bytes: &[u8]) {
        let mut stored_persistently = false;
        let mut shadowing: Vec<&Arc<dyn StorageTier>> = Vec::new();
        let mut any_persistent = false;

        for tier in &self.tiers {
            let persistent = tier.kind().is_persistent();
            if persistent {
                any_persistent = true;
                if stored_persistently {
                    continue;
                }
            }

            match tier.write_raw(Table::Entries, key, bytes).await {
                Ok(()) if persistent => stored_persistently = true,
                Ok(()) => {}
                Err(e) => {
                    self.tier_failed(tier.as_ref(), "write", key, &e);
                    if persistent {
                        shadowing.push(tier);
                    }
                }
            }
        }

        if any_persistent && !stored_persistently {
            warn!(key = %key, "No persistent tier accepted the entry, it will not survive a restart");
        }

        // A failed higher tier may still hold an older copy that would be read first
        if stored_persistently {
            for tier in shadowing {
                if let Err(e) = tier.delete_raw(Table::Entries, key).await {
                    debug!(tier = tier.name(), key = %key, error = %e, "Could not drop shadowing copy");
                }
            }
        }
    }

    async fn promote(&self, level: usize, key: &str, bytes: &[u8]) {
        let _gate = self.gates.lock(key).await;
        // Skip if the entry was replaced or purged since it was read
        match self.tiers[level].read_raw(Table::Entries, key).await {
            Ok(Some(current)) if current == bytes => {}
            _ => return,
        }

        let mut promoted = false;
        for tier in self.tiers.iter().take(level) {
            match tier.write_raw(Table::Entries, key, bytes).await {
                Ok(()) => promoted = true,
                Err(e) => self.tier_failed(tier.as_ref(), "promote", key, &e),
            }
        }
        if promoted {
            self.counters.promotions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, from_level = level, "Promoted entry");
        }
    }

    pub(crate) fn tier_failed(&self, tier: &dyn StorageTier, op: &str, key: &str, error: &TierError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(tier = tier.name(), op, key = %key, error = %error, "Tier operation failed, falling back");
    }
}
