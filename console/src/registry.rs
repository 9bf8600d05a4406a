//! Environment registry.
//!
//! Owns the fleet of environments and enforces the environment-level rules:
//!
//! - exactly one master once the first environment exists
//! - the master and the last environment cannot be deleted
//! - deletion requires the current name, re-typed exactly
//! - credentials are write-only
//!
//! The master designation is a single pointer, so "two masters" and "no
//! master" cannot be represented. Mutations on one environment are serialized
//! through its write lock; reads never take per-environment locks.

use crate::locks::{KeyedLocks, ReadGuard};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use model::error::require_non_blank;
use model::{
    ConsoleError, ConsoleResult, Credential, Environment, EnvironmentId, EnvironmentRecord,
    PreconditionViolation, Stage,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Work that must happen atomically with an environment's deletion, while
/// the environment is still write-locked.
#[async_trait]
pub(crate) trait DeletionCascade: Send + Sync {
    async fn environment_deleted(&self, environment_id: &EnvironmentId);
}

#[cfg(test)]
pub(crate) struct NoCascade;

#[cfg(test)]
#[async_trait]
impl DeletionCascade for NoCascade {
    async fn environment_deleted(&self, _environment_id: &EnvironmentId) {}
}

struct Slot {
    sequence: u64,
    record: EnvironmentRecord,
}

pub struct EnvironmentRegistry {
    environments: DashMap<EnvironmentId, Slot>,
    master: RwLock<Option<EnvironmentId>>,
    sequence: AtomicU64,
    locks: KeyedLocks<EnvironmentId>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self {
            environments: DashMap::new(),
            master: RwLock::new(None),
            sequence: AtomicU64::new(0),
            locks: KeyedLocks::new(),
        }
    }

    /// Create an environment. The first one becomes the master.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str, domain: &str, stage: Stage) -> ConsoleResult<Environment> {
        let record = EnvironmentRecord::new(name, domain, stage)?;
        self.insert(record).await
    }

    /// Add a pre-built record, keeping its id (used when importing a fleet)
    pub(crate) async fn insert(&self, record: EnvironmentRecord) -> ConsoleResult<Environment> {
        let id = record.id.clone();
        let _guard = self.locks.write(&id).await;
        let mut master = self.master.write().await;

        match self.environments.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(ConsoleError::validation(
                    "id",
                    format!("environment {} already exists", id),
                ));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                    record,
                });
            }
        }

        let promoted = master.is_none();
        if promoted {
            *master = Some(id.clone());
        }
        info!(environment_id = %id, master = promoted, "Environment created");

        self.summarize(&id, master.as_ref())
    }

    /// All environments in creation order
    pub async fn list(&self) -> Vec<Environment> {
        let master = self.master.read().await;
        let mut slots: Vec<(u64, EnvironmentId)> = self
            .environments
            .iter()
            .map(|slot| (slot.sequence, slot.key().clone()))
            .collect();
        slots.sort();

        slots
            .into_iter()
            .filter_map(|(_, id)| self.summarize(&id, master.as_ref()).ok())
            .collect()
    }

    pub async fn get(&self, id: &EnvironmentId) -> ConsoleResult<Environment> {
        let master = self.master.read().await;
        self.summarize(id, master.as_ref())
    }

    pub fn contains(&self, id: &EnvironmentId) -> bool {
        self.environments.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }

    pub async fn master(&self) -> Option<EnvironmentId> {
        self.master.read().await.clone()
    }

    #[instrument(skip(self))]
    pub async fn rename(&self, id: &EnvironmentId, name: &str) -> ConsoleResult<Environment> {
        let name = require_non_blank("name", name)?;
        self.update(id, |record| record.name = name).await
    }

    #[instrument(skip(self))]
    pub async fn set_domain(&self, id: &EnvironmentId, domain: &str) -> ConsoleResult<Environment> {
        let domain = require_non_blank("domain", domain)?;
        self.update(id, |record| record.domain = domain).await
    }

    #[instrument(skip(self))]
    pub async fn set_stage(&self, id: &EnvironmentId, stage: &str) -> ConsoleResult<Environment> {
        let stage: Stage = stage.parse()?;
        self.update(id, |record| record.stage = stage).await
    }

    /// Store the API key for an environment. It can never be read back.
    #[instrument(skip(self, secret))]
    pub async fn set_credential(&self, id: &EnvironmentId, secret: &str) -> ConsoleResult<Environment> {
        let credential = Credential::new(secret)?;
        self.update(id, |record| record.set_credential(credential))
            .await
    }

    /// Make `id` the master, clearing the previous master in the same step
    #[instrument(skip(self))]
    pub async fn set_master(&self, id: &EnvironmentId) -> ConsoleResult<Environment> {
        loop {
            let current = self.master.read().await.clone();
            let mut keys = vec![id.clone()];
            keys.extend(current.clone());
            let _guards = self.locks.write_many(keys).await;

            if !self.contains(id) {
                return Err(ConsoleError::environment_not_found(id));
            }

            let mut master = self.master.write().await;
            if *master != current {
                // master moved while we were waiting for the locks
                continue;
            }
            *master = Some(id.clone());
            info!(
                environment_id = %id,
                previous = ?current,
                "Master environment changed"
            );
            return self.summarize(id, master.as_ref());
        }
    }

    /// Delete an environment.
    ///
    /// Rules are checked in order: the registry must keep at least one
    /// environment, the master cannot be deleted, and `confirmation` must equal
    /// the current name byte for byte. `cascade` runs while the environment is
    /// still locked, before it is removed.
    #[instrument(skip(self, cascade))]
    pub(crate) async fn delete(
        &self,
        id: &EnvironmentId,
        confirmation: &str,
        cascade: &dyn DeletionCascade,
    ) -> ConsoleResult<Environment> {
        let guard = self.locks.write(id).await;

        let deleted = {
            let master = self.master.read().await;
            let environment = self.summarize(id, master.as_ref())?;

            if self.environments.len() <= 1 {
                warn!(environment_id = %id, "Refusing to delete the last environment");
                return Err(PreconditionViolation::LastEnvironment.into());
            }
            if environment.is_master {
                warn!(environment_id = %id, "Refusing to delete the master environment");
                return Err(PreconditionViolation::MasterEnvironment.into());
            }
            if confirmation != environment.name {
                warn!(environment_id = %id, "Delete confirmation does not match");
                return Err(PreconditionViolation::ConfirmationMismatch.into());
            }
            environment
        };

        cascade.environment_deleted(id).await;
        self.environments.remove(id);
        drop(guard);

        info!(environment_id = %id, name = %deleted.name, "Environment deleted");
        Ok(Environment {
            can_delete: false,
            ..deleted
        })
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Hold read locks on `ids` so none of them can be mutated or deleted
    /// until the guards drop.
    pub(crate) async fn pin(&self, ids: impl IntoIterator<Item = EnvironmentId>) -> Vec<ReadGuard> {
        self.locks.read_many(ids).await
    }

    async fn update<F>(&self, id: &EnvironmentId, apply: F) -> ConsoleResult<Environment>
    where
        F: FnOnce(&mut EnvironmentRecord),
    {
        let _guard = self.locks.write(id).await;
        {
            let mut slot = self
                .environments
                .get_mut(id)
                .ok_or_else(|| ConsoleError::environment_not_found(id))?;
            apply(&mut slot.record);
        }
        debug!(environment_id = %id, "Environment updated");
        self.get(id).await
    }

    fn summarize(
        &self,
        id: &EnvironmentId,
        master: Option<&EnvironmentId>,
    ) -> ConsoleResult<Environment> {
        // len() locks every shard, so read it before holding one
        let count = self.environments.len();
        let slot = self
            .environments
            .get(id)
            .ok_or_else(|| ConsoleError::environment_not_found(id))?;
        let is_master = master == Some(id);
        let can_delete = count > 1 && !is_master;
        Ok(slot.record.to_environment(is_master, can_delete))
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
