//! Per-key write gates
//!
//! A key's tag memberships and its stored entry are changed together while
//! the key's gate is held, so a concurrent purge cannot slip between the tag
//! record and the entry write it describes. `clear_cache` takes the exclusive
//! side of a store-wide gate; every keyed mutation holds the shared side.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub(crate) struct KeyGates {
    store: RwLock<()>,
    keys: DashMap<String, Arc<Mutex<()>>>,
}

/// Held while one key is mutated
pub(crate) struct KeyGuard<'a> {
    keys: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    _key: OwnedMutexGuard<()>,
    _store: RwLockReadGuard<'a, ()>,
}

impl KeyGates {
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let store = self.store.read().await;
        let gate = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = gate.lock_owned().await;

        KeyGuard {
            keys: &self.keys,
            key: key.to_string(),
            _key: guard,
            _store: store,
        }
    }

    /// Exclusive access to the whole store
    pub(crate) async fn lock_store(&self) -> RwLockWriteGuard<'_, ()> {
        self.store.write().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.keys.len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Two references left means the map and this guard, nobody is waiting
        self.keys
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) == 2);
    }
}
