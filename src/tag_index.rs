//! Tag Index
//!
//! Secondary mapping tag -> keys used for bulk invalidation without scanning
//! every entry. The in-memory maps are authoritative for the running process;
//! each changed tag record is written through to the `Tags` table of every
//! persistent tier and reloaded on startup.
//!
//! The index is kept a superset of the truth: it may briefly reference a key
//! whose entry is already gone, which only costs one redundant delete, but it
//! never misses a key that a live entry is tagged with.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codecs::EntryCodec;
use crate::traits::{StorageTier, Table};

#[derive(Debug, Default)]
struct TagState {
    by_tag: HashMap<String, BTreeSet<String>>,
    by_key: HashMap<String, BTreeSet<String>>,
}

impl TagState {
    fn link(&mut self, tag: &str, key: &str) {
        self.by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        self.by_key
            .entry(key.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    /// Remove `key` from `tag`, dropping the tag record once empty
    fn unlink(&mut self, tag: &str, key: &str) {
        if let Some(keys) = self.by_tag.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_tag.remove(tag);
            }
        }
    }

    /// Current key set of each tag, empty sets mean "delete the record"
    fn snapshot(&self, tags: &BTreeSet<String>) -> Vec<(String, BTreeSet<String>)> {
        tags.iter()
            .map(|tag| {
                let keys = self.by_tag.get(tag).cloned().unwrap_or_default();
                (tag.clone(), keys)
            })
            .collect()
    }
}

/// Reverse index from tag to cache keys
pub struct TagIndex {
    state: Mutex<TagState>,
    /// Serializes mutations so persisted records are written in the same
    /// order as the in-memory changes that produced them
    write_gate: tokio::sync::Mutex<()>,
    persistent: Vec<Arc<dyn StorageTier>>,
    codec: EntryCodec,
}

impl TagIndex {
    /// Build the index from the tag records stored in `persistent` tiers
    ///
    /// Records from all tiers are merged. Unreadable records are skipped.
    pub async fn load(persistent: Vec<Arc<dyn StorageTier>>) -> Self {
        let codec = EntryCodec;
        let mut state = TagState::default();

        for tier in &persistent {
            let tags = match tier.iterate_keys(Table::Tags).await {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(tier = tier.name(), error = %e, "Failed to list tag records");
                    continue;
                }
            };

            for tag in tags {
                let record = match tier.read_raw(Table::Tags, &tag).await {
                    Ok(Some(bytes)) => codec.decode_tag_record(&bytes),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(tier = tier.name(), tag = %tag, error = %e, "Failed to read tag record");
                        continue;
                    }
                };
                match record {
                    Ok(keys) => {
                        for key in keys {
                            state.link(&tag, &key);
                        }
                    }
                    Err(e) => {
                        warn!(tier = tier.name(), tag = %tag, error = %e, "Skipping corrupt tag record");
                    }
                }
            }
        }

        if !state.by_tag.is_empty() {
            info!(
                tags = state.by_tag.len(),
                keys = state.by_key.len(),
                "Tag index restored"
            );
        }

        Self {
            state: Mutex::new(state),
            write_gate: tokio::sync::Mutex::new(()),
            persistent,
            codec,
        }
    }

    /// Index with no persistence
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(TagState::default()),
            write_gate: tokio::sync::Mutex::new(()),
            persistent: Vec::new(),
            codec: EntryCodec,
        }
    }

    /// Keys carrying at least one of `tags`
    pub fn keys_for_tags<S: AsRef<str>>(&self, tags: &[S]) -> BTreeSet<String> {
        let state = self.state.lock();
        tags.iter()
            .filter_map(|tag| state.by_tag.get(tag.as_ref()))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn tags_for_key(&self, key: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .by_key
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Every key holding at least one membership
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().by_key.keys().cloned().collect()
    }

    /// Number of tags with at least one key
    pub fn len(&self) -> usize {
        self.state.lock().by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the memberships of `key` with `tags`
    ///
    /// Tags the key no longer carries lose it; new tags gain it.
    pub async fn record(&self, key: &str, tags: &BTreeSet<String>) {
        let _gate = self.write_gate.lock().await;

        let changed = {
            let mut state = self.state.lock();
            let previous = state.by_key.remove(key).unwrap_or_default();
            for stale in previous.difference(tags) {
                state.unlink(stale, key);
            }
            for tag in tags {
                state.link(tag, key);
            }
            let touched: BTreeSet<String> = previous.union(tags).cloned().collect();
            state.snapshot(&touched)
        };

        self.persist(changed).await;
    }

    /// Drop every membership of `key`
    pub async fn remove_key(&self, key: &str) {
        let _gate = self.write_gate.lock().await;

        let changed = {
            let mut state = self.state.lock();
            let Some(previous) = state.by_key.remove(key) else {
                return;
            };
            for tag in &previous {
                state.unlink(tag, key);
            }
            state.snapshot(&previous)
        };

        self.persist(changed).await;
    }

    /// Drop the whole index, in memory and in every persistent tier
    pub async fn clear(&self) {
        let _gate = self.write_gate.lock().await;

        {
            let mut state = self.state.lock();
            state.by_tag.clear();
            state.by_key.clear();
        }

        for tier in &self.persistent {
            if let Err(e) = tier.clear_all(Table::Tags).await {
                warn!(tier = tier.name(), error = %e, "Failed to clear tag records");
            }
        }
    }

    async fn persist(&self, records: Vec<(String, BTreeSet<String>)>) {
        for (tag, keys) in records {
            let bytes = if keys.is_empty() {
                None
            } else {
                match self.codec.encode_tag_record(&keys) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(tag = %tag, error = %e, "Failed to encode tag record");
                        continue;
                    }
                }
            };

            for tier in &self.persistent {
                let result = match &bytes {
                    Some(bytes) => tier.write_raw(Table::Tags, &tag, bytes).await,
                    None => tier.delete_raw(Table::Tags, &tag).await,
                };
                if let Err(e) = result {
                    warn!(tier = tier.name(), tag = %tag, error = %e, "Failed to persist tag record");
                }
            }
            debug!(tag = %tag, keys = keys.len(), "Tag record updated");
        }
    }
}
