pub mod config;
pub mod environment;
pub mod error;
pub mod ids;
pub mod introspection;
pub mod promotion;
pub mod resource;

pub use config::ConsoleConfig;
pub use environment::{Credential, Environment, EnvironmentRecord, Stage};
pub use error::{ConsoleError, ConsoleResult, ErrorKind, PreconditionViolation};
pub use ids::{EnvironmentId, PromotionId, ResourceId};
pub use introspection::{
    DisconnectedIntrospector, EnvironmentStats, IntrospectionError, RemoteIntrospector,
};
pub use promotion::{DeploymentRecord, DeploymentTarget, PromotionOptions, PromotionState};
pub use resource::{
    ManagedResource, NewResource, ResourceDetails, ResourceKind, ResourceSummary,
    WorkspaceContents,
};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::environment::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::introspection::*;
    pub use crate::promotion::*;
    pub use crate::resource::*;
}
