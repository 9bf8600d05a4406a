use crate::ids::{EnvironmentId, PromotionId};
use crate::introspection::IntrospectionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business rules a request can violate.
///
/// Each variant is a distinct reason so callers can tell, for example, a
/// mistyped delete confirmation apart from an attempt to delete the master.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("cannot delete the last environment")]
    LastEnvironment,

    #[error("cannot delete the master environment")]
    MasterEnvironment,

    #[error("confirmation does not match the environment name")]
    ConfirmationMismatch,

    #[error("cannot deploy to own environment")]
    DeployToOwnEnvironment,

    #[error("not managed")]
    NotManaged,
}

/// Coarse classification of a [`ConsoleError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Blank or malformed input
    Validation,
    /// Unknown id
    NotFound,
    /// Business-rule violation
    Precondition,
    /// Introspection or promotion blocked by a missing credential
    CredentialMissing,
    /// Request cancelled before validation completed
    Cancelled,
    /// The remote environment could not be reached
    Unavailable,
}

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionViolation),

    #[error("Environment {environment_id} has no API key configured: {hint}")]
    CredentialMissing {
        environment_id: EnvironmentId,
        hint: String,
    },

    #[error("Promotion {promotion_id} was cancelled")]
    Cancelled { promotion_id: PromotionId },

    #[error("Environment {environment_id} is unavailable: {source}")]
    Introspection {
        environment_id: EnvironmentId,
        #[source]
        source: IntrospectionError,
    },
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

impl ConsoleError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn environment_not_found(id: &EnvironmentId) -> Self {
        Self::NotFound {
            entity: "Environment",
            id: id.to_string(),
        }
    }

    pub fn resource_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "Resource",
            id: id.to_string(),
        }
    }

    pub fn credential_missing(environment_id: &EnvironmentId) -> Self {
        Self::CredentialMissing {
            environment_id: environment_id.clone(),
            hint: "add an API key for this environment before fetching data from it or deploying to it"
                .to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::CredentialMissing { .. } => ErrorKind::CredentialMissing,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Introspection { .. } => ErrorKind::Unavailable,
        }
    }

    /// The violated rule, if this is a precondition failure
    pub fn violation(&self) -> Option<&PreconditionViolation> {
        match self {
            Self::Precondition(violation) => Some(violation),
            _ => None,
        }
    }
}

/// Trim `value` and reject it if nothing is left.
pub fn require_non_blank(field: &'static str, value: &str) -> ConsoleResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConsoleError::validation(field, "must not be blank"));
    }
    Ok(trimmed.to_string())
}
