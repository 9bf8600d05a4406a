//! The entry point the UI collaborator talks to.

use crate::access::AccessGate;
use crate::catalog::ResourceCatalog;
use crate::promotion::{PendingPromotion, PromotionEngine};
use crate::registry::EnvironmentRegistry;
use model::{
    ConsoleConfig, ConsoleError, ConsoleResult, DeploymentRecord, DeploymentTarget,
    DisconnectedIntrospector, Environment, EnvironmentId, EnvironmentStats, IntrospectionError,
    ManagedResource, NewResource, PromotionOptions, RemoteIntrospector, ResourceId, ResourceKind,
    ResourceSummary, Stage, WorkspaceContents,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Environment registry, resource catalog and promotion engine wired
/// together, plus the remote introspector used for stats.
pub struct Console {
    config: ConsoleConfig,
    environments: Arc<EnvironmentRegistry>,
    catalog: Arc<ResourceCatalog>,
    promotions: PromotionEngine,
    introspector: Arc<dyn RemoteIntrospector>,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> ConsoleResult<Self> {
        config
            .validate()
            .map_err(|message| ConsoleError::validation("config", message))?;

        let environments = Arc::new(EnvironmentRegistry::new());
        let catalog = Arc::new(ResourceCatalog::new(environments.clone()));
        let promotions =
            PromotionEngine::new(environments.clone(), catalog.clone(), config.history_limit);

        Ok(Self {
            config,
            environments,
            catalog,
            promotions,
            introspector: Arc::new(DisconnectedIntrospector),
        })
    }

    pub fn with_introspector(mut self, introspector: Arc<dyn RemoteIntrospector>) -> Self {
        self.introspector = introspector;
        self
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn environments(&self) -> &EnvironmentRegistry {
        &self.environments
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn promotions(&self) -> &PromotionEngine {
        &self.promotions
    }

    /// Options a deploy starts from when the caller does not override them
    pub fn default_options(&self) -> PromotionOptions {
        PromotionOptions::copy_config(self.config.default_copy_config)
    }

    // Environments

    pub async fn create_environment(
        &self,
        name: &str,
        domain: &str,
        stage: Stage,
    ) -> ConsoleResult<Environment> {
        self.environments.create(name, domain, stage).await
    }

    pub async fn list_environments(&self) -> Vec<Environment> {
        self.environments.list().await
    }

    pub async fn environment(&self, id: &EnvironmentId) -> ConsoleResult<Environment> {
        self.environments.get(id).await
    }

    pub async fn rename_environment(
        &self,
        id: &EnvironmentId,
        name: &str,
    ) -> ConsoleResult<Environment> {
        self.environments.rename(id, name).await
    }

    pub async fn set_domain(&self, id: &EnvironmentId, domain: &str) -> ConsoleResult<Environment> {
        self.environments.set_domain(id, domain).await
    }

    pub async fn set_stage(&self, id: &EnvironmentId, stage: &str) -> ConsoleResult<Environment> {
        self.environments.set_stage(id, stage).await
    }

    pub async fn set_credential(
        &self,
        id: &EnvironmentId,
        secret: &str,
    ) -> ConsoleResult<Environment> {
        self.environments.set_credential(id, secret).await
    }

    pub async fn set_master(&self, id: &EnvironmentId) -> ConsoleResult<Environment> {
        self.environments.set_master(id).await
    }

    /// Delete an environment, its resources, and every deployment into it.
    ///
    /// This is the only way to delete an environment from outside the
    /// crate; the registry's own `delete` is not reachable:
    ///
    /// ```compile_fail
    /// # async fn bypass(app: &console::Console, id: &model::EnvironmentId) {
    /// app.environments().delete(id, "Testing", app.catalog()).await;
    /// # }
    /// ```
    pub async fn delete_environment(
        &self,
        id: &EnvironmentId,
        confirmation: &str,
    ) -> ConsoleResult<Environment> {
        self.environments
            .delete(id, confirmation, self.catalog.as_ref())
            .await
    }

    // Resources

    pub async fn register_resource(&self, resource: NewResource) -> ConsoleResult<ManagedResource> {
        self.catalog.register(resource).await
    }

    pub async fn list_resources(
        &self,
        environment_id: &EnvironmentId,
        kind: Option<ResourceKind>,
    ) -> ConsoleResult<Vec<ResourceSummary>> {
        self.catalog.list_resources(environment_id, kind).await
    }

    pub fn resource(&self, id: &ResourceId) -> ConsoleResult<ResourceSummary> {
        self.catalog.resource(id).map(|resource| resource.summary())
    }

    pub async fn set_managed(&self, id: &ResourceId, managed: bool) -> ConsoleResult<ResourceSummary> {
        self.catalog.set_managed(id, managed).await
    }

    pub async fn workspace_contents(&self, id: &ResourceId) -> ConsoleResult<WorkspaceContents> {
        self.catalog.workspace_contents(id).await
    }

    // Promotion

    pub fn request_promotion(
        &self,
        resource_id: &ResourceId,
        target_id: &EnvironmentId,
        options: PromotionOptions,
    ) -> PendingPromotion {
        self.promotions.request(resource_id, target_id, options)
    }

    pub async fn promote(
        &self,
        resource_id: &ResourceId,
        target_id: &EnvironmentId,
        options: PromotionOptions,
    ) -> ConsoleResult<DeploymentRecord> {
        self.promotions.promote(resource_id, target_id, options).await
    }

    pub async fn promote_workspace(
        &self,
        workspace_id: &ResourceId,
        target_id: &EnvironmentId,
        options: PromotionOptions,
    ) -> ConsoleResult<Vec<DeploymentRecord>> {
        self.promotions
            .promote_workspace(workspace_id, target_id, options)
            .await
    }

    pub async fn deployment_targets(
        &self,
        resource_id: &ResourceId,
    ) -> ConsoleResult<Vec<DeploymentTarget>> {
        self.promotions.targets(resource_id).await
    }

    pub async fn history(&self, resource_id: Option<&ResourceId>) -> Vec<DeploymentRecord> {
        self.promotions.history(resource_id).await
    }

    // Introspection

    /// Aggregate counts from the remote environment.
    ///
    /// Never calls out without a credential, and gives up after the
    /// configured introspection timeout.
    #[instrument(skip(self), fields(introspector = self.introspector.name()))]
    pub async fn environment_stats(&self, id: &EnvironmentId) -> ConsoleResult<EnvironmentStats> {
        let environment = self.environments.get(id).await?;
        AccessGate::require(&environment)?;

        let timeout = self.config.introspection_timeout;
        let fetched = tokio::time::timeout(timeout, self.introspector.fetch_stats(&environment))
            .await
            .unwrap_or(Err(IntrospectionError::Timeout(timeout)));

        match fetched {
            Ok(stats) => {
                debug!(?stats, "Fetched environment stats");
                Ok(stats)
            }
            Err(source) => {
                warn!(error = %source, "Environment stats unavailable");
                Err(ConsoleError::Introspection {
                    environment_id: id.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingIntrospector {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl RemoteIntrospector for CountingIntrospector {
        async fn fetch_stats(
            &self,
            _environment: &Environment,
        ) -> Result<EnvironmentStats, IntrospectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(EnvironmentStats {
                workspaces: 8,
                user_groups: 6,
                total_users: 24,
                managed_objects: 19,
            })
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    async fn console(delay: Duration) -> (Console, Arc<CountingIntrospector>) {
        let introspector = Arc::new(CountingIntrospector {
            calls: AtomicUsize::new(0),
            delay,
        });
        let config = ConsoleConfig::new().with_introspection_timeout(Duration::from_millis(50));
        let console = Console::new(config)
            .unwrap()
            .with_introspector(introspector.clone());
        (console, introspector)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ConsoleConfig::new().with_history_limit(0);
        let err = Console::new(config).err().unwrap();
        assert!(matches!(err, ConsoleError::Validation { field: "config", .. }));
    }

    #[tokio::test]
    async fn test_default_options_follow_config() {
        let console = Console::new(ConsoleConfig::new().with_default_copy_config(false)).unwrap();
        assert!(!console.default_options().copy_config);
    }

    #[tokio::test]
    async fn test_stats_require_credential() {
        let (console, introspector) = console(Duration::ZERO).await;
        let dev = console
            .create_environment("Development", "lowcoder-dev.company.com", Stage::Development)
            .await
            .unwrap();

        let err = console.environment_stats(&dev.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialMissing);
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 0);

        console.set_credential(&dev.id, "sk-dev").await.unwrap();
        let stats = console.environment_stats(&dev.id).await.unwrap();
        assert_eq!(stats.total_users, 24);
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 1);

        let err = console
            .environment_stats(&EnvironmentId::new("missing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stats_time_out() {
        let (console, _) = console(Duration::from_secs(5)).await;
        let dev = console
            .create_environment("Development", "lowcoder-dev.company.com", Stage::Development)
            .await
            .unwrap();
        console.set_credential(&dev.id, "sk-dev").await.unwrap();

        let err = console.environment_stats(&dev.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(matches!(
            err,
            ConsoleError::Introspection {
                source: IntrospectionError::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disconnected_by_default() {
        let console = Console::new(ConsoleConfig::default()).unwrap();
        let dev = console
            .create_environment("Development", "lowcoder-dev.company.com", Stage::Development)
            .await
            .unwrap();
        console.set_credential(&dev.id, "sk-dev").await.unwrap();

        let err = console.environment_stats(&dev.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
