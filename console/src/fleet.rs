//! Fleet files: a TOML description of environments and the resources
//! discovered in them.
//!
//! ```toml
//! [[environments]]
//! id = "env1"
//! name = "Development"
//! domain = "lowcoder-dev.company.com"
//! stage = "development"
//! master = true
//! api_key_env = "LOWCODER_DEV_API_KEY"
//!
//! [[resources]]
//! id = "ws1"
//! owner = "env1"
//! kind = "workspace"
//! name = "Marketing"
//! managed = true
//! deployed_to = ["env2"]
//! ```
//!
//! A fleet is applied through the public console operations, so a file can
//! never produce a state the console itself would reject.

use crate::console::Console;
use async_trait::async_trait;
use model::{
    ConsoleError, Environment, EnvironmentId, EnvironmentRecord, EnvironmentStats,
    IntrospectionError, NewResource, RemoteIntrospector, ResourceDetails, ResourceId,
    ResourceKind, Stage,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// The fleet the console starts with when no file is given
pub const DEMO_FLEET: &str = r#"
[[environments]]
id = "env1"
name = "Development"
domain = "lowcoder-dev.company.com"
stage = "development"
master = true
api_key = "demo-development-key"
stats = { workspaces = 12, userGroups = 8, totalUsers = 45, managedObjects = 35 }

[[environments]]
id = "env2"
name = "Testing"
domain = "lowcoder-test.company.com"
stage = "testing"
api_key = "demo-testing-key"
stats = { workspaces = 8, userGroups = 6, totalUsers = 24, managedObjects = 19 }

[[environments]]
id = "env3"
name = "Production"
domain = "lowcoder-prod.company.com"
stage = "production"

[[resources]]
id = "ws1"
owner = "env1"
kind = "workspace"
name = "Marketing"
owner_name = "John Doe"
users = 12
managed = true
deployed_to = ["env2", "env3"]

[[resources]]
id = "ws2"
owner = "env1"
kind = "workspace"
name = "Sales"
owner_name = "Jane Smith"
users = 15
managed = true
deployed_to = ["env2"]

[[resources]]
id = "ws3"
owner = "env1"
kind = "workspace"
name = "Engineering"
owner_name = "Robert Johnson"
users = 8

[[resources]]
id = "ws4"
owner = "env1"
kind = "workspace"
name = "Human Resources"
owner_name = "Emily Davis"
users = 6

[[resources]]
id = "app1"
owner = "env1"
parent = "ws1"
kind = "application"
name = "Campaign Dashboard"
owner_name = "Alice Cooper"
icon = "📊"
published = true
managed = true
deployed_to = ["env2"]

[[resources]]
id = "app2"
owner = "env1"
parent = "ws1"
kind = "application"
name = "Social Media Tracker"
owner_name = "Bob Marley"
icon = "🔍"
published = true
managed = true

[[resources]]
id = "app3"
owner = "env1"
parent = "ws1"
kind = "application"
name = "Content Calendar"
owner_name = "Charlie Brown"
icon = "📅"

[[resources]]
id = "ds1"
owner = "env1"
parent = "ws1"
kind = "data-source"
name = "Marketing Database"
connection_type = "PostgreSQL"
managed = true
deployed_to = ["env2"]

[[resources]]
id = "ds2"
owner = "env1"
parent = "ws1"
kind = "data-source"
name = "Analytics API"
connection_type = "REST API"
managed = true

[[resources]]
id = "q1"
owner = "env1"
parent = "ws1"
kind = "query"
name = "Campaign Performance"
data_source = "ds1"
managed = true
deployed_to = ["env2"]

[[resources]]
id = "q2"
owner = "env1"
parent = "ws1"
kind = "query"
name = "User Engagement"
data_source = "ds2"

[[resources]]
id = "ug1"
owner = "env1"
kind = "user-group"
name = "Marketing Team"
users = 12
managed = true
deployed_to = ["env2", "env3"]

[[resources]]
id = "ug2"
owner = "env1"
kind = "user-group"
name = "Sales Team"
users = 15
managed = true
deployed_to = ["env2"]

[[resources]]
id = "ug3"
owner = "env1"
kind = "user-group"
name = "Engineering Team"
users = 8

[[resources]]
id = "ug4"
owner = "env1"
kind = "user-group"
name = "HR Team"
users = 6
"#;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Failed to read fleet file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fleet file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid fleet: {reason}")]
    Invalid { reason: String },

    #[error("Environment {environment} expects its API key in ${variable}, which is not set")]
    MissingSecret {
        environment: String,
        variable: String,
    },

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Clone, Serialize, Deserialize)]
pub struct EnvironmentEntry {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub stage: Stage,
    #[serde(default)]
    pub master: bool,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Inline API key, for demo fleets only
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Canned stats served by [`StaticIntrospector`]
    #[serde(default)]
    pub stats: Option<EnvironmentStats>,
}

impl fmt::Debug for EnvironmentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("stage", &self.stage)
            .field("master", &self.master)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("stats", &self.stats)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: String,
    pub owner: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub deployed_to: Vec<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub users: u32,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub connection_type: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
}

impl ResourceEntry {
    fn to_new_resource(&self) -> FleetResult<NewResource> {
        let kind: ResourceKind = self
            .kind
            .parse()
            .map_err(|reason| FleetError::Invalid { reason })?;
        let details = match kind {
            ResourceKind::Workspace => ResourceDetails::Workspace {
                owner: self.owner_name.clone(),
                users: self.users,
            },
            ResourceKind::Application => ResourceDetails::Application {
                owner: self.owner_name.clone(),
                icon: self.icon.clone(),
                published: self.published,
            },
            ResourceKind::DataSource => ResourceDetails::DataSource {
                connection_type: self.connection_type.clone().ok_or_else(|| {
                    FleetError::Invalid {
                        reason: format!("data source {} has no connection_type", self.id),
                    }
                })?,
            },
            ResourceKind::Query => ResourceDetails::Query {
                data_source: self.data_source.as_deref().map(ResourceId::from),
            },
            ResourceKind::UserGroup => ResourceDetails::UserGroup { users: self.users },
        };

        let mut resource = NewResource::new(EnvironmentId::new(&self.owner), &self.name, details)
            .with_id(self.id.as_str())
            .managed(self.managed)
            .deployed_to(self.deployed_to.iter().map(EnvironmentId::new).collect());
        if let Some(parent) = &self.parent {
            resource = resource.with_parent(ResourceId::new(parent));
        }
        Ok(resource)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub environments: Vec<EnvironmentEntry>,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

impl FleetFile {
    pub fn parse(text: &str) -> FleetResult<Self> {
        let fleet: FleetFile = toml::from_str(text)?;
        fleet.validate()?;
        Ok(fleet)
    }

    pub fn load(path: impl AsRef<Path>) -> FleetResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| FleetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded fleet file");
        Self::parse(&text)
    }

    pub fn demo() -> FleetResult<Self> {
        Self::parse(DEMO_FLEET)
    }

    /// Structural checks that need nothing but the file
    pub fn validate(&self) -> FleetResult<()> {
        if self.environments.is_empty() {
            return Err(FleetError::Invalid {
                reason: "a fleet needs at least one environment".to_string(),
            });
        }
        let masters = self.environments.iter().filter(|env| env.master).count();
        if masters > 1 {
            return Err(FleetError::Invalid {
                reason: format!("{} environments are marked master", masters),
            });
        }
        for env in &self.environments {
            if env.api_key.is_some() && env.api_key_env.is_some() {
                return Err(FleetError::Invalid {
                    reason: format!("environment {} sets both api_key and api_key_env", env.id),
                });
            }
        }
        Ok(())
    }

    /// Load the fleet into `console`. Resources are registered in file order,
    /// so a workspace must come before its children.
    pub async fn apply(&self, console: &Console) -> FleetResult<()> {
        for entry in &self.environments {
            let record = EnvironmentRecord::with_id(
                EnvironmentId::new(&entry.id),
                &entry.name,
                &entry.domain,
                entry.stage.clone(),
            )?;
            let environment = console.environments().insert(record).await?;

            if let Some(secret) = resolve_secret(entry)? {
                console.set_credential(&environment.id, &secret).await?;
            }
            if entry.master {
                console.set_master(&environment.id).await?;
            }
        }

        for entry in &self.resources {
            console.register_resource(entry.to_new_resource()?).await?;
        }

        info!(
            environments = self.environments.len(),
            resources = self.resources.len(),
            "Fleet applied"
        );
        Ok(())
    }

    /// Introspector answering from the `stats` tables of this fleet
    pub fn introspector(&self) -> StaticIntrospector {
        StaticIntrospector::new(
            self.environments
                .iter()
                .filter_map(|env| env.stats.map(|stats| (EnvironmentId::new(&env.id), stats))),
        )
    }
}

fn resolve_secret(entry: &EnvironmentEntry) -> FleetResult<Option<String>> {
    if let Some(variable) = &entry.api_key_env {
        return std::env::var(variable)
            .map(Some)
            .map_err(|_| FleetError::MissingSecret {
                environment: entry.id.clone(),
                variable: variable.clone(),
            });
    }
    Ok(entry.api_key.clone())
}

/// Serves fixed stats per environment; unknown environments are unreachable
pub struct StaticIntrospector {
    stats: HashMap<EnvironmentId, EnvironmentStats>,
}

impl StaticIntrospector {
    pub fn new(stats: impl IntoIterator<Item = (EnvironmentId, EnvironmentStats)>) -> Self {
        Self {
            stats: stats.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RemoteIntrospector for StaticIntrospector {
    async fn fetch_stats(
        &self,
        environment: &Environment,
    ) -> Result<EnvironmentStats, IntrospectionError> {
        self.stats
            .get(&environment.id)
            .copied()
            .ok_or_else(|| IntrospectionError::Unreachable {
                message: format!("{} did not answer", environment.domain),
            })
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::ConsoleConfig;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[test]
    fn test_demo_fleet_parses() {
        let fleet = FleetFile::demo().unwrap();
        assert_eq!(fleet.environments.len(), 3);
        assert_eq!(fleet.resources.len(), 15);
        assert!(fleet.environments[0].master);
        assert_eq!(fleet.environments[2].stage, Stage::Production);
    }

    #[test]
    fn test_debug_output_hides_inline_keys() {
        let fleet = FleetFile::demo().unwrap();
        let printed = format!("{:?}", fleet);
        assert!(!printed.contains("demo-development-key"));
        assert!(!printed.contains("demo-testing-key"));
        assert!(printed.contains("api_key: Some(\"***\")"));
        assert!(printed.contains("api_key: None"));
    }

    #[tokio::test]
    async fn test_demo_fleet_applies() {
        let fleet = FleetFile::demo().unwrap();
        let console = Console::new(ConsoleConfig::default())
            .unwrap()
            .with_introspector(Arc::new(fleet.introspector()));
        fleet.apply(&console).await.unwrap();

        let envs = console.list_environments().await;
        assert_eq!(envs.len(), 3);
        assert!(envs[0].is_master);
        assert!(envs[1].has_credential);
        assert!(!envs[2].has_credential);

        let contents = console.workspace_contents(&"ws1".into()).await.unwrap();
        assert_eq!(contents.applications.len(), 3);
        assert_eq!(contents.data_sources.len(), 2);
        assert_eq!(contents.queries.len(), 2);

        let stats = console.environment_stats(&"env2".into()).await.unwrap();
        assert_eq!(stats.managed_objects, 19);
    }

    #[test]
    fn test_rejects_two_masters() {
        let text = r#"
            [[environments]]
            id = "a"
            name = "A"
            domain = "a.example.com"
            stage = "development"
            master = true

            [[environments]]
            id = "b"
            name = "B"
            domain = "b.example.com"
            stage = "testing"
            master = true
        "#;
        assert!(matches!(
            FleetFile::parse(text),
            Err(FleetError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_fleet() {
        assert!(FleetFile::parse("").is_err());
    }

    #[tokio::test]
    async fn test_master_flag_moves_master() {
        let text = r#"
            [[environments]]
            id = "a"
            name = "A"
            domain = "a.example.com"
            stage = "development"

            [[environments]]
            id = "b"
            name = "B"
            domain = "b.example.com"
            stage = "testing"
            master = true
        "#;
        let console = Console::new(ConsoleConfig::default()).unwrap();
        FleetFile::parse(text).unwrap().apply(&console).await.unwrap();
        assert_eq!(
            console.environments().master().await,
            Some(EnvironmentId::new("b"))
        );
    }

    #[tokio::test]
    async fn test_bad_resource_surfaces_console_error() {
        let text = r#"
            [[environments]]
            id = "a"
            name = "A"
            domain = "a.example.com"
            stage = "development"

            [[resources]]
            id = "app1"
            owner = "a"
            kind = "application"
            name = "Orphan"
        "#;
        let console = Console::new(ConsoleConfig::default()).unwrap();
        let err = FleetFile::parse(text)
            .unwrap()
            .apply(&console)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Console(ConsoleError::Validation { .. })));
    }

    #[test]
    fn test_unknown_kind_is_invalid() {
        let entry = ResourceEntry {
            id: "x".into(),
            owner: "a".into(),
            kind: "dashboard".into(),
            name: "X".into(),
            parent: None,
            managed: false,
            deployed_to: Vec::new(),
            owner_name: None,
            users: 0,
            icon: None,
            published: false,
            connection_type: None,
            data_source: None,
        };
        assert!(matches!(
            entry.to_new_resource(),
            Err(FleetError::Invalid { .. })
        ));
    }

    #[test]
    fn test_missing_secret_variable() {
        let entry = EnvironmentEntry {
            id: "a".into(),
            name: "A".into(),
            domain: "a.example.com".into(),
            stage: Stage::Development,
            master: false,
            api_key_env: Some("CONSOLE_TEST_SURELY_UNSET_KEY".into()),
            api_key: None,
            stats: None,
        };
        assert!(matches!(
            resolve_secret(&entry),
            Err(FleetError::MissingSecret { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[environments]]
            id = "env1"
            name = "Development"
            domain = "lowcoder-dev.company.com"
            stage = "development"
            "#
        )
        .unwrap();

        let fleet = FleetFile::load(file.path()).unwrap();
        assert_eq!(fleet.environments[0].name, "Development");

        let err = FleetFile::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, FleetError::Io { .. }));
    }

    #[tokio::test]
    async fn test_static_introspector_unknown_environment() {
        let introspector = StaticIntrospector::new(Vec::new());
        let environment = EnvironmentRecord::new("A", "a.example.com", Stage::Testing)
            .unwrap()
            .to_environment(false, true);
        assert!(introspector.fetch_stats(&environment).await.is_err());
    }
}
