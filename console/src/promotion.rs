//! Promotion engine.
//!
//! A promotion moves through `Requested -> Validated -> Applied`, or ends
//! `Rejected`. Validation and apply run under the target environment's read
//! lock and the resource's write lock, so retries against the same target
//! serialize and the second one is a no-op.
//!
//! Checks run in this order and the first failure wins:
//!
//! 1. the resource exists
//! 2. the target environment exists
//! 3. the target is not the resource's owner
//! 4. the target has a credential
//! 5. the resource is managed

use crate::access::AccessGate;
use crate::catalog::ResourceCatalog;
use crate::locks::{ReadGuard, WriteGuard};
use crate::registry::EnvironmentRegistry;
use chrono::Utc;
use model::{
    ConsoleError, ConsoleResult, DeploymentRecord, DeploymentTarget, EnvironmentId,
    ManagedResource, PreconditionViolation, PromotionId, PromotionOptions, PromotionState,
    ResourceId, ResourceKind,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

const CANCELLED: &str = "cancelled";

/// Bounded, oldest-first audit trail of applied promotions
pub struct PromotionLog {
    records: Mutex<VecDeque<DeploymentRecord>>,
    limit: usize,
}

impl PromotionLog {
    pub fn new(limit: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub async fn push(&self, record: DeploymentRecord) {
        let mut records = self.records.lock().await;
        if records.len() == self.limit {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub async fn history(&self, resource_id: Option<&ResourceId>) -> Vec<DeploymentRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| resource_id.map_or(true, |id| &record.resource_id == id))
            .cloned()
            .collect()
    }
}

struct Held {
    _environments: Vec<ReadGuard>,
    _resources: Vec<WriteGuard>,
}

#[derive(Clone)]
pub struct PromotionEngine {
    environments: Arc<EnvironmentRegistry>,
    catalog: Arc<ResourceCatalog>,
    log: Arc<PromotionLog>,
}

impl PromotionEngine {
    pub fn new(
        environments: Arc<EnvironmentRegistry>,
        catalog: Arc<ResourceCatalog>,
        history_limit: usize,
    ) -> Self {
        Self {
            environments,
            catalog,
            log: Arc::new(PromotionLog::new(history_limit)),
        }
    }

    /// Start a promotion without running it yet
    pub fn request(
        &self,
        resource_id: &ResourceId,
        target_id: &EnvironmentId,
        options: PromotionOptions,
    ) -> PendingPromotion {
        let (state, _) = watch::channel(PromotionState::Requested);
        let pending = PendingPromotion {
            id: PromotionId::generate(),
            resource_id: resource_id.clone(),
            target_id: target_id.clone(),
            options,
            state: Arc::new(state),
            engine: self.clone(),
        };
        debug!(promotion_id = %pending.id, resource_id = %resource_id, target = %target_id, "Promotion requested");
        pending
    }

    /// Promote one resource into `target_id`
    pub async fn promote(
        &self,
        resource_id: &ResourceId,
        target_id: &EnvironmentId,
        options: PromotionOptions,
    ) -> ConsoleResult<DeploymentRecord> {
        self.request(resource_id, target_id, options).run().await
    }

    /// Promote a workspace and every managed child it holds.
    ///
    /// The whole batch is validated before anything is applied, so either
    /// every record is written or none is. Unmanaged children are skipped.
    #[instrument(skip(self, options), fields(workspace = %workspace_id, target = %target_id))]
    pub async fn promote_workspace(
        &self,
        workspace_id: &ResourceId,
        target_id: &EnvironmentId,
        options: PromotionOptions,
    ) -> ConsoleResult<Vec<DeploymentRecord>> {
        if !self.catalog.contains(workspace_id) {
            return Err(ConsoleError::resource_not_found(workspace_id));
        }
        let promotion_id = PromotionId::generate();

        let (_held, workspace, children) = loop {
            let expected: Vec<ResourceId> = self
                .catalog
                .children_of(workspace_id)
                .into_iter()
                .map(|child| child.id)
                .collect();

            let mut ids = expected.clone();
            ids.push(workspace_id.clone());
            let held = self.hold(target_id, ids).await;

            let workspace = self.catalog.resource(workspace_id)?;
            if workspace.kind() != ResourceKind::Workspace {
                return Err(ConsoleError::validation(
                    "resource",
                    format!("{} is a {}, not a workspace", workspace_id, workspace.kind()),
                ));
            }
            let children = self.catalog.children_of(workspace_id);
            let current: Vec<&ResourceId> = children.iter().map(|child| &child.id).collect();
            if current == expected.iter().collect::<Vec<_>>() {
                break (held, workspace, children);
            }
            // a child was registered while we waited for locks
        };

        let mut batch = Vec::with_capacity(children.len() + 1);
        if let Err(err) = self.validate(&workspace, target_id).await {
            warn!(%promotion_id, error = %err, "Workspace promotion rejected");
            return Err(err);
        }
        batch.push(workspace);
        for child in children.into_iter().filter(|child| child.managed) {
            if let Err(err) = self.validate(&child, target_id).await {
                warn!(%promotion_id, child = %child.id, error = %err, "Workspace promotion rejected");
                return Err(err);
            }
            batch.push(child);
        }

        let mut records = Vec::with_capacity(batch.len());
        for resource in &batch {
            records.push(self.apply(promotion_id, resource, target_id, options)?);
        }
        for record in &records {
            self.log.push(record.clone()).await;
        }

        info!(%promotion_id, promoted = records.len(), "Workspace promoted");
        Ok(records)
    }

    /// Every environment a resource could be promoted into: all but its owner
    pub async fn targets(&self, resource_id: &ResourceId) -> ConsoleResult<Vec<DeploymentTarget>> {
        let resource = self.catalog.resource(resource_id)?;
        Ok(self
            .environments
            .list()
            .await
            .into_iter()
            .filter(|environment| environment.id != resource.owner_environment_id)
            .map(|environment| DeploymentTarget {
                already_deployed: resource.deployed_to.contains(&environment.id),
                ready: AccessGate::can_introspect(&environment),
                environment,
            })
            .collect())
    }

    pub async fn history(&self, resource_id: Option<&ResourceId>) -> Vec<DeploymentRecord> {
        self.log.history(resource_id).await
    }

    async fn hold(&self, target_id: &EnvironmentId, resources: Vec<ResourceId>) -> Held {
        let environments = self.environments.pin([target_id.clone()]).await;
        let resources = self.catalog.lock(resources).await;
        Held {
            _environments: environments,
            _resources: resources,
        }
    }

    async fn validate(&self, resource: &ManagedResource, target_id: &EnvironmentId) -> ConsoleResult<()> {
        let target = self.environments.get(target_id).await?;
        if target.id == resource.owner_environment_id {
            return Err(PreconditionViolation::DeployToOwnEnvironment.into());
        }
        AccessGate::require(&target)?;
        if !resource.managed {
            return Err(PreconditionViolation::NotManaged.into());
        }
        Ok(())
    }

    fn apply(
        &self,
        promotion_id: PromotionId,
        resource: &ManagedResource,
        target_id: &EnvironmentId,
        options: PromotionOptions,
    ) -> ConsoleResult<DeploymentRecord> {
        let newly_deployed = self.catalog.record_deployment(&resource.id, target_id)?;
        Ok(DeploymentRecord {
            promotion_id,
            resource_id: resource.id.clone(),
            resource_kind: resource.kind(),
            source_environment_id: resource.owner_environment_id.clone(),
            target_environment_id: target_id.clone(),
            deployed_at: Utc::now(),
            copy_config: options.copy_config,
            newly_deployed,
        })
    }
}

/// Cancels a pending promotion from another task
#[derive(Clone)]
pub struct PromotionCanceller {
    id: PromotionId,
    state: Arc<watch::Sender<PromotionState>>,
}

impl PromotionCanceller {
    /// Returns `true` if the promotion was still `Requested` and is now
    /// rejected. Validated or applied promotions cannot be cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.state.send_if_modified(|state| {
            if *state == PromotionState::Requested {
                *state = PromotionState::Rejected(CANCELLED.to_string());
                true
            } else {
                false
            }
        });
        if cancelled {
            info!(promotion_id = %self.id, "Promotion cancelled");
        }
        cancelled
    }
}

/// A promotion that has been requested but not yet run
pub struct PendingPromotion {
    id: PromotionId,
    resource_id: ResourceId,
    target_id: EnvironmentId,
    options: PromotionOptions,
    state: Arc<watch::Sender<PromotionState>>,
    engine: PromotionEngine,
}

impl PendingPromotion {
    pub fn id(&self) -> PromotionId {
        self.id
    }

    pub fn state(&self) -> PromotionState {
        self.state.borrow().clone()
    }

    /// Watch state changes, e.g. to report progress
    pub fn subscribe(&self) -> watch::Receiver<PromotionState> {
        self.state.subscribe()
    }

    pub fn canceller(&self) -> PromotionCanceller {
        PromotionCanceller {
            id: self.id,
            state: self.state.clone(),
        }
    }

    pub fn cancel(&self) -> bool {
        self.canceller().cancel()
    }

    /// Validate and apply. Waiting for locks ends early if the promotion is
    /// cancelled.
    #[instrument(skip(self), fields(promotion_id = %self.id, resource_id = %self.resource_id, target = %self.target_id))]
    pub async fn run(self) -> ConsoleResult<DeploymentRecord> {
        let cancelled = wait_cancelled(self.state.subscribe());
        let _held = tokio::select! {
            biased;
            _ = cancelled => return Err(self.cancelled()),
            held = self.engine.hold(&self.target_id, vec![self.resource_id.clone()]) => held,
        };

        let checked = match self.engine.catalog.resource(&self.resource_id) {
            Ok(resource) => self
                .engine
                .validate(&resource, &self.target_id)
                .await
                .map(|_| resource),
            Err(err) => Err(err),
        };
        let resource = match checked {
            Ok(resource) => resource,
            Err(err) => {
                if !self.transition(PromotionState::Rejected(err.to_string())) {
                    return Err(self.cancelled());
                }
                warn!(error = %err, "Promotion rejected");
                return Err(err);
            }
        };
        if !self.transition(PromotionState::Validated) {
            return Err(self.cancelled());
        }

        let record = self
            .engine
            .apply(self.id, &resource, &self.target_id, self.options)?;
        self.transition(PromotionState::Applied);
        self.engine.log.push(record.clone()).await;

        info!(
            newly_deployed = record.newly_deployed,
            copy_config = record.copy_config,
            "Promotion applied"
        );
        Ok(record)
    }

    fn transition(&self, next: PromotionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.can_transition_to(&next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn cancelled(&self) -> ConsoleError {
        ConsoleError::Cancelled { promotion_id: self.id }
    }
}

async fn wait_cancelled(mut state: watch::Receiver<PromotionState>) {
    let closed = state
        .wait_for(|state| matches!(state, PromotionState::Rejected(_)))
        .await
        .is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
