//! Promotion (deploy) request and record types.

use crate::environment::Environment;
use crate::ids::{EnvironmentId, PromotionId, ResourceId};
use crate::resource::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOptions {
    /// Clone auxiliary configuration (connection secrets, environment
    /// variables) into the target along with the resource definition. When
    /// false the target keeps its own configuration.
    pub copy_config: bool,
}

impl Default for PromotionOptions {
    fn default() -> Self {
        Self { copy_config: true }
    }
}

impl PromotionOptions {
    pub fn copy_config(copy_config: bool) -> Self {
        Self { copy_config }
    }
}

/// Lifecycle of a single promotion request.
///
/// `Requested -> Validated -> Applied`, or `Requested -> Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum PromotionState {
    Requested,
    Validated,
    Applied,
    Rejected(String),
}

impl PromotionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PromotionState::Applied | PromotionState::Rejected(_))
    }

    pub fn can_transition_to(&self, next: &PromotionState) -> bool {
        matches!(
            (self, next),
            (PromotionState::Requested, PromotionState::Validated)
                | (PromotionState::Requested, PromotionState::Rejected(_))
                | (PromotionState::Validated, PromotionState::Applied)
        )
    }
}

/// Outcome of an applied promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub promotion_id: PromotionId,
    pub resource_id: ResourceId,
    pub resource_kind: ResourceKind,
    pub source_environment_id: EnvironmentId,
    pub target_environment_id: EnvironmentId,
    pub deployed_at: DateTime<Utc>,
    pub copy_config: bool,
    /// False when the target was already in the resource's deployment set
    pub newly_deployed: bool,
}

/// A candidate target for promoting a given resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTarget {
    pub environment: Environment,
    pub already_deployed: bool,
    /// The target has a credential and can receive the promotion
    pub ready: bool,
}
