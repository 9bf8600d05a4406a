//! Resource catalog.
//!
//! Holds every managed resource exactly once, under its owner environment,
//! together with its managed flag and deployment set. Listing another
//! environment's resources goes through the [`AccessGate`].

use crate::access::AccessGate;
use crate::locks::{KeyedLocks, WriteGuard};
use crate::registry::{DeletionCascade, EnvironmentRegistry};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use model::{
    ConsoleError, ConsoleResult, EnvironmentId, ManagedResource, NewResource, ResourceId,
    ResourceKind, ResourceSummary, WorkspaceContents,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

struct Slot {
    sequence: u64,
    resource: ManagedResource,
}

pub struct ResourceCatalog {
    environments: Arc<EnvironmentRegistry>,
    resources: DashMap<ResourceId, Slot>,
    sequence: AtomicU64,
    locks: KeyedLocks<ResourceId>,
}

impl ResourceCatalog {
    pub fn new(environments: Arc<EnvironmentRegistry>) -> Self {
        Self {
            environments,
            resources: DashMap::new(),
            sequence: AtomicU64::new(0),
            locks: KeyedLocks::new(),
        }
    }

    /// Ingest a resource discovered in its owner environment.
    ///
    /// The owner and every pre-seeded deployment target must exist; a child
    /// must name a workspace of the same owner as its parent.
    #[instrument(skip(self, new), fields(owner = %new.owner_environment_id, kind = %new.kind()))]
    pub async fn register(&self, new: NewResource) -> ConsoleResult<ManagedResource> {
        let resource = new.into_resource()?;

        let mut referenced = vec![resource.owner_environment_id.clone()];
        referenced.extend(resource.deployed_to.iter().cloned());
        let _pinned = self.environments.pin(referenced.clone()).await;
        for id in &referenced {
            if !self.environments.contains(id) {
                return Err(ConsoleError::environment_not_found(id));
            }
        }

        if let Some(parent_id) = &resource.parent {
            let parent = self
                .resources
                .get(parent_id)
                .ok_or_else(|| ConsoleError::resource_not_found(parent_id))?;
            if parent.resource.kind() != ResourceKind::Workspace {
                return Err(ConsoleError::validation(
                    "parent",
                    format!("{} is not a workspace", parent_id),
                ));
            }
            if parent.resource.owner_environment_id != resource.owner_environment_id {
                return Err(ConsoleError::validation(
                    "parent",
                    format!(
                        "workspace {} belongs to {}",
                        parent_id, parent.resource.owner_environment_id
                    ),
                ));
            }
        }

        let _guard = self.locks.write(&resource.id).await;
        match self.resources.entry(resource.id.clone()) {
            Entry::Occupied(_) => {
                return Err(ConsoleError::validation(
                    "id",
                    format!("resource {} is already registered", resource.id),
                ));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                    resource: resource.clone(),
                });
            }
        }

        info!(resource_id = %resource.id, managed = resource.managed, "Resource registered");
        Ok(resource)
    }

    /// Resources owned by or deployed into `environment_id`, in registration
    /// order, optionally restricted to one kind.
    #[instrument(skip(self))]
    pub async fn list_resources(
        &self,
        environment_id: &EnvironmentId,
        kind: Option<ResourceKind>,
    ) -> ConsoleResult<Vec<ResourceSummary>> {
        let environment = self.environments.get(environment_id).await?;
        AccessGate::require_listing(&environment)?;

        let resources = self.collect(|resource| {
            let visible = &resource.owner_environment_id == environment_id
                || resource.deployed_to.contains(environment_id);
            visible && kind.map_or(true, |kind| resource.kind() == kind)
        });
        debug!(count = resources.len(), "Listed resources");

        Ok(resources.iter().map(ManagedResource::summary).collect())
    }

    pub fn resource(&self, id: &ResourceId) -> ConsoleResult<ManagedResource> {
        self.resources
            .get(id)
            .map(|slot| slot.resource.clone())
            .ok_or_else(|| ConsoleError::resource_not_found(id))
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Opt a resource in or out of promotion. Existing deployments stay.
    #[instrument(skip(self))]
    pub async fn set_managed(&self, id: &ResourceId, managed: bool) -> ConsoleResult<ResourceSummary> {
        let _guard = self.locks.write(id).await;
        let mut slot = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ConsoleError::resource_not_found(id))?;
        slot.resource.managed = managed;
        info!(resource_id = %id, managed, "Managed flag changed");
        Ok(slot.resource.summary())
    }

    /// A workspace and the applications, data sources and queries it holds
    #[instrument(skip(self))]
    pub async fn workspace_contents(&self, id: &ResourceId) -> ConsoleResult<WorkspaceContents> {
        let workspace = self.resource(id)?;
        if workspace.kind() != ResourceKind::Workspace {
            return Err(ConsoleError::validation(
                "resource",
                format!("{} is a {}, not a workspace", id, workspace.kind()),
            ));
        }
        let owner = self.environments.get(&workspace.owner_environment_id).await?;
        AccessGate::require_listing(&owner)?;

        let mut contents = WorkspaceContents {
            workspace: workspace.summary(),
            applications: Vec::new(),
            data_sources: Vec::new(),
            queries: Vec::new(),
        };
        for child in self.children_of(id) {
            let bucket = match child.kind() {
                ResourceKind::Application => &mut contents.applications,
                ResourceKind::DataSource => &mut contents.data_sources,
                ResourceKind::Query => &mut contents.queries,
                ResourceKind::Workspace | ResourceKind::UserGroup => continue,
            };
            bucket.push(child.summary());
        }
        Ok(contents)
    }

    /// Add `target` to the resource's deployment set. Returns `false` when it
    /// was already there. The caller must hold the resource's write lock.
    pub(crate) fn record_deployment(
        &self,
        id: &ResourceId,
        target: &EnvironmentId,
    ) -> ConsoleResult<bool> {
        let mut slot = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ConsoleError::resource_not_found(id))?;
        slot.resource.record_deployment(target)
    }

    /// Children of a workspace in registration order
    pub(crate) fn children_of(&self, workspace: &ResourceId) -> Vec<ManagedResource> {
        self.collect(|resource| resource.parent.as_ref() == Some(workspace))
    }

    pub(crate) async fn lock(&self, ids: impl IntoIterator<Item = ResourceId>) -> Vec<WriteGuard> {
        self.locks.write_many(ids).await
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }

    fn collect<F>(&self, keep: F) -> Vec<ManagedResource>
    where
        F: Fn(&ManagedResource) -> bool,
    {
        let mut matched: Vec<(u64, ManagedResource)> = self
            .resources
            .iter()
            .filter(|slot| keep(&slot.resource))
            .map(|slot| (slot.sequence, slot.resource.clone()))
            .collect();
        matched.sort_by_key(|(sequence, _)| *sequence);
        matched.into_iter().map(|(_, resource)| resource).collect()
    }
}

#[async_trait]
impl DeletionCascade for ResourceCatalog {
    /// Remove everything the environment owns and scrub it from every
    /// deployment set.
    async fn environment_deleted(&self, environment_id: &EnvironmentId) {
        let mut owned = BTreeSet::new();
        let mut deployed = BTreeSet::new();
        for slot in self.resources.iter() {
            if &slot.resource.owner_environment_id == environment_id {
                owned.insert(slot.key().clone());
            } else if slot.resource.deployed_to.contains(environment_id) {
                deployed.insert(slot.key().clone());
            }
        }

        let guards = self.lock(owned.iter().chain(deployed.iter()).cloned()).await;
        for id in &owned {
            self.resources.remove(id);
        }
        let mut scrubbed = 0;
        for id in &deployed {
            if let Some(mut slot) = self.resources.get_mut(id) {
                if slot.resource.forget_environment(environment_id) {
                    scrubbed += 1;
                }
            }
        }
        drop(guards);

        info!(
            environment_id = %environment_id,
            removed = owned.len(),
            scrubbed,
            "Purged environment from catalog"
        );
    }
}
