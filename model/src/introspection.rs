//! Contract for the remote introspection collaborator.
//!
//! Reaching a remote environment (transport, authentication, retries) lives
//! outside the console. The console only calls into a [`RemoteIntrospector`]
//! after the access gate has confirmed a credential is configured, and bounds
//! each call with its own timeout.

use crate::environment::Environment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntrospectionError {
    #[error("unreachable: {message}")]
    Unreachable { message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected by remote: {message}")]
    Rejected { message: String },
}

/// Aggregate counts reported by a remote environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStats {
    pub workspaces: u64,
    pub user_groups: u64,
    pub total_users: u64,
    pub managed_objects: u64,
}

#[async_trait]
pub trait RemoteIntrospector: Send + Sync {
    async fn fetch_stats(&self, environment: &Environment)
        -> Result<EnvironmentStats, IntrospectionError>;

    fn name(&self) -> &str;
}

/// Introspector used when no remote collaborator is wired in
pub struct DisconnectedIntrospector;

#[async_trait]
impl RemoteIntrospector for DisconnectedIntrospector {
    async fn fetch_stats(
        &self,
        environment: &Environment,
    ) -> Result<EnvironmentStats, IntrospectionError> {
        Err(IntrospectionError::Unreachable {
            message: format!("no remote introspector configured for {}", environment.domain),
        })
    }

    fn name(&self) -> &str {
        "disconnected"
    }
}
