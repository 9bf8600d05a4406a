//! Environment records and the environment read model.

use crate::error::{require_non_blank, ConsoleError, ConsoleResult};
use crate::ids::EnvironmentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment stage of an environment. Display-only: no rule depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Stage {
    Development,
    Testing,
    Production,
    Other(String),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Development => write!(f, "development"),
            Stage::Testing => write!(f, "testing"),
            Stage::Production => write!(f, "production"),
            Stage::Other(tag) => write!(f, "{}", tag),
        }
    }
}

impl FromStr for Stage {
    type Err = ConsoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let tag = require_non_blank("stage", value)?;
        Ok(match tag.to_lowercase().as_str() {
            "development" => Stage::Development,
            "testing" => Stage::Testing,
            "production" => Stage::Production,
            _ => Stage::Other(tag),
        })
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.to_string()
    }
}

impl TryFrom<String> for Stage {
    type Error = ConsoleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// API key for a remote environment.
///
/// Write-only: there is no accessor for the secret and `Debug` is redacted.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> ConsoleResult<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ConsoleError::validation("credential", "must not be empty"));
        }
        Ok(Self(secret))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Authoritative environment state as held by the registry.
///
/// Master designation is not stored here; the registry keeps a single master
/// pointer and derives `is_master` when building the read model.
#[derive(Debug, Clone)]
pub struct EnvironmentRecord {
    pub id: EnvironmentId,
    pub name: String,
    pub domain: String,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    credential: Option<Credential>,
}

impl EnvironmentRecord {
    /// Validate and build a new record. `name` and `domain` are stored trimmed.
    pub fn new(name: &str, domain: &str, stage: Stage) -> ConsoleResult<Self> {
        Self::with_id(EnvironmentId::generate(), name, domain, stage)
    }

    pub fn with_id(
        id: EnvironmentId,
        name: &str,
        domain: &str,
        stage: Stage,
    ) -> ConsoleResult<Self> {
        if id.as_str().trim().is_empty() {
            return Err(ConsoleError::validation("id", "must not be blank"));
        }
        Ok(Self {
            id,
            name: require_non_blank("name", name)?,
            domain: require_non_blank("domain", domain)?,
            stage,
            created_at: Utc::now(),
            credential: None,
        })
    }

    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn to_environment(&self, is_master: bool, can_delete: bool) -> Environment {
        Environment {
            id: self.id.clone(),
            name: self.name.clone(),
            domain: self.domain.clone(),
            stage: self.stage.clone(),
            is_master,
            has_credential: self.has_credential(),
            can_delete,
            created_at: self.created_at,
        }
    }
}

/// Environment summary: the only environment shape exposed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    pub domain: String,
    pub stage: Stage,
    pub is_master: bool,
    pub has_credential: bool,
    /// Whether `Delete` could succeed given a matching confirmation
    pub can_delete: bool,
    pub created_at: DateTime<Utc>,
}
