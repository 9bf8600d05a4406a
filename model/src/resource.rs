//! Managed resources: workspaces and the applications, data sources and
//! queries they aggregate, plus top-level user groups.

use crate::error::{require_non_blank, ConsoleError, ConsoleResult, PreconditionViolation};
use crate::ids::{EnvironmentId, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Workspace,
    Application,
    DataSource,
    Query,
    UserGroup,
}

impl ResourceKind {
    /// Kinds that must live inside a workspace
    pub fn is_workspace_child(&self) -> bool {
        matches!(
            self,
            ResourceKind::Application | ResourceKind::DataSource | ResourceKind::Query
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Workspace => write!(f, "workspace"),
            ResourceKind::Application => write!(f, "application"),
            ResourceKind::DataSource => write!(f, "data-source"),
            ResourceKind::Query => write!(f, "query"),
            ResourceKind::UserGroup => write!(f, "user-group"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "workspace" => Ok(ResourceKind::Workspace),
            "application" | "app" => Ok(ResourceKind::Application),
            "data-source" | "datasource" | "data_source" => Ok(ResourceKind::DataSource),
            "query" => Ok(ResourceKind::Query),
            "user-group" | "usergroup" | "user_group" => Ok(ResourceKind::UserGroup),
            other => Err(format!("unknown resource kind: {}", other)),
        }
    }
}

/// Kind-specific attributes. Opaque to promotion rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResourceDetails {
    Workspace {
        #[serde(default)]
        owner: Option<String>,
        #[serde(default)]
        users: u32,
    },
    Application {
        #[serde(default)]
        owner: Option<String>,
        #[serde(default)]
        icon: Option<String>,
        #[serde(default)]
        published: bool,
    },
    DataSource {
        connection_type: String,
    },
    Query {
        /// Data source the query reads from, if it is a managed resource
        #[serde(default)]
        data_source: Option<ResourceId>,
    },
    UserGroup {
        #[serde(default)]
        users: u32,
    },
}

impl ResourceDetails {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDetails::Workspace { .. } => ResourceKind::Workspace,
            ResourceDetails::Application { .. } => ResourceKind::Application,
            ResourceDetails::DataSource { .. } => ResourceKind::DataSource,
            ResourceDetails::Query { .. } => ResourceKind::Query,
            ResourceDetails::UserGroup { .. } => ResourceKind::UserGroup,
        }
    }
}

/// A resource as held by the catalog.
///
/// Exists once, in its owner environment. Promotion only adds to
/// `deployed_to`; it never copies the resource's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    pub id: ResourceId,
    pub name: String,
    pub owner_environment_id: EnvironmentId,
    /// Workspace this resource belongs to (children only)
    pub parent: Option<ResourceId>,
    pub managed: bool,
    pub deployed_to: BTreeSet<EnvironmentId>,
    pub details: ResourceDetails,
    pub discovered_at: DateTime<Utc>,
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        self.details.kind()
    }

    /// Add `target` to the deployment set. Returns `false` if it was already
    /// there.
    pub fn record_deployment(&mut self, target: &EnvironmentId) -> ConsoleResult<bool> {
        if target == &self.owner_environment_id {
            return Err(PreconditionViolation::DeployToOwnEnvironment.into());
        }
        Ok(self.deployed_to.insert(target.clone()))
    }

    /// Drop every reference to `environment` from the deployment set
    pub fn forget_environment(&mut self, environment: &EnvironmentId) -> bool {
        self.deployed_to.remove(environment)
    }

    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind(),
            managed: self.managed,
            deployed_to: self.deployed_to.iter().cloned().collect(),
            owner_environment_id: self.owner_environment_id.clone(),
        }
    }
}

/// Resource summary: the only resource shape exposed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub managed: bool,
    pub deployed_to: Vec<EnvironmentId>,
    pub owner_environment_id: EnvironmentId,
}

/// A resource discovered in its owner environment, ready to be registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewResource {
    pub id: Option<ResourceId>,
    pub name: String,
    pub owner_environment_id: EnvironmentId,
    pub parent: Option<ResourceId>,
    pub managed: bool,
    pub deployed_to: Vec<EnvironmentId>,
    pub details: ResourceDetails,
}

impl NewResource {
    pub fn new(
        owner: EnvironmentId,
        name: impl Into<String>,
        details: ResourceDetails,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            owner_environment_id: owner,
            parent: None,
            managed: false,
            deployed_to: Vec::new(),
            details,
        }
    }

    pub fn workspace(owner: EnvironmentId, name: impl Into<String>) -> Self {
        Self::new(
            owner,
            name,
            ResourceDetails::Workspace {
                owner: None,
                users: 0,
            },
        )
    }

    pub fn application(
        owner: EnvironmentId,
        workspace: ResourceId,
        name: impl Into<String>,
    ) -> Self {
        Self::new(
            owner,
            name,
            ResourceDetails::Application {
                owner: None,
                icon: None,
                published: false,
            },
        )
        .with_parent(workspace)
    }

    pub fn data_source(
        owner: EnvironmentId,
        workspace: ResourceId,
        name: impl Into<String>,
        connection_type: impl Into<String>,
    ) -> Self {
        Self::new(
            owner,
            name,
            ResourceDetails::DataSource {
                connection_type: connection_type.into(),
            },
        )
        .with_parent(workspace)
    }

    pub fn query(
        owner: EnvironmentId,
        workspace: ResourceId,
        name: impl Into<String>,
        data_source: Option<ResourceId>,
    ) -> Self {
        Self::new(owner, name, ResourceDetails::Query { data_source }).with_parent(workspace)
    }

    pub fn user_group(owner: EnvironmentId, name: impl Into<String>, users: u32) -> Self {
        Self::new(owner, name, ResourceDetails::UserGroup { users })
    }

    pub fn with_id(mut self, id: impl Into<ResourceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_details(mut self, details: ResourceDetails) -> Self {
        self.details = details;
        self
    }

    pub fn managed(mut self, managed: bool) -> Self {
        self.managed = managed;
        self
    }

    pub fn deployed_to(mut self, environments: Vec<EnvironmentId>) -> Self {
        self.deployed_to = environments;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.details.kind()
    }

    /// Checks that need nothing but the request itself. Parent and owner
    /// existence are checked by the catalog.
    pub fn into_resource(self) -> ConsoleResult<ManagedResource> {
        let name = require_non_blank("name", &self.name)?;
        let kind = self.kind();
        if kind.is_workspace_child() && self.parent.is_none() {
            return Err(ConsoleError::validation(
                "parent",
                format!("a {} must belong to a workspace", kind),
            ));
        }
        if !kind.is_workspace_child() && self.parent.is_some() {
            return Err(ConsoleError::validation(
                "parent",
                format!("a {} cannot belong to a workspace", kind),
            ));
        }

        let mut resource = ManagedResource {
            id: self.id.unwrap_or_else(ResourceId::generate),
            name,
            owner_environment_id: self.owner_environment_id,
            parent: self.parent,
            managed: self.managed,
            deployed_to: BTreeSet::new(),
            details: self.details,
            discovered_at: Utc::now(),
        };
        for target in &self.deployed_to {
            resource.record_deployment(target).map_err(|_| {
                ConsoleError::validation(
                    "deployed_to",
                    "a resource cannot be deployed to its own environment",
                )
            })?;
        }
        Ok(resource)
    }
}

/// A workspace together with the children it aggregates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceContents {
    pub workspace: ResourceSummary,
    pub applications: Vec<ResourceSummary>,
    pub data_sources: Vec<ResourceSummary>,
    pub queries: Vec<ResourceSummary>,
}
