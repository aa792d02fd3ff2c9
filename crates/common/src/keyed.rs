//! Per-key async critical sections.
//!
//! Readers of a warm cache never touch these locks; they only serialize the
//! slow path (connect, discover, probe) for a single key.

use std::{hash::Hash, sync::Arc};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
};

#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    gates: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            gates: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the critical section for `key`.
    ///
    /// The map shard lock is released before awaiting the gate.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let gate = Arc::clone(&self.gates.entry(key.clone()).or_default());
        gate.lock_owned().await
    }

    /// Drop the gate for `key`. Holders of an existing guard are unaffected.
    pub fn forget(&self, key: &K) {
        self.gates.remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
