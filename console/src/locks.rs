//! Per-id async locks.
//!
//! Writers on one id are serialized; different ids never contend. Callers
//! that need several locks must go through [`KeyedLocks::write_many`] /
//! [`KeyedLocks::read_many`], which acquire in ascending key order, and must
//! take environment locks before resource locks.
//!
//! An id only has an entry while some guard holds or waits on it. The last
//! guard to drop removes the entry, so ids that never existed leave nothing
//! behind.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Table<K> = Arc<DashMap<K, Arc<RwLock<()>>>>;

pub type ReadGuard = KeyedGuard<OwnedRwLockReadGuard<()>>;
pub type WriteGuard = KeyedGuard<OwnedRwLockWriteGuard<()>>;

/// A held lock that drops its table entry once nobody else wants it
pub struct KeyedGuard<G> {
    guard: Option<G>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<G> Drop for KeyedGuard<G> {
    fn drop(&mut self) {
        // unlock first so our own handle no longer counts
        drop(self.guard.take());
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

pub struct KeyedLocks<K>
where
    K: Eq + Hash,
{
    locks: Table<K>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    fn handle(&self, key: &K) -> Arc<RwLock<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    fn wrap<G>(&self, key: &K, guard: G) -> KeyedGuard<G> {
        let locks = self.locks.clone();
        let key = key.clone();
        KeyedGuard {
            guard: Some(guard),
            release: Some(Box::new(move || {
                // the entry lock is held while counting, so a concurrent
                // `handle` either sees the entry or creates a fresh one
                locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
            })),
        }
    }

    pub async fn read(&self, key: &K) -> ReadGuard {
        let guard = self.handle(key).read_owned().await;
        self.wrap(key, guard)
    }

    pub async fn write(&self, key: &K) -> WriteGuard {
        let guard = self.handle(key).write_owned().await;
        self.wrap(key, guard)
    }

    pub async fn read_many(&self, keys: impl IntoIterator<Item = K>) -> Vec<ReadGuard> {
        let mut guards = Vec::new();
        for key in sorted_unique(keys) {
            guards.push(self.read(&key).await);
        }
        guards
    }

    pub async fn write_many(&self, keys: impl IntoIterator<Item = K>) -> Vec<WriteGuard> {
        let mut guards = Vec::new();
        for key in sorted_unique(keys) {
            guards.push(self.write(&key).await);
        }
        guards
    }

    /// Ids that currently have a lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_unique<K: Ord>(keys: impl IntoIterator<Item = K>) -> Vec<K> {
    let mut keys: Vec<K> = keys.into_iter().collect();
    keys.sort();
    keys.dedup();
    keys
}
