//! Strongly-typed identifiers for environments, resources and promotions.
//!
//! Environment and resource ids are opaque strings so that ids discovered
//! from a remote environment (`"env1"`, `"ws1"`) can be carried as-is.
//! Freshly created entities get a UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an environment. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(String);

impl EnvironmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EnvironmentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Unique identifier for a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a single promotion request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromotionId(Uuid);

impl PromotionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PromotionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promotion:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(EnvironmentId::generate(), EnvironmentId::generate());
        assert_ne!(ResourceId::generate(), ResourceId::generate());
        assert_ne!(PromotionId::generate(), PromotionId::generate());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = EnvironmentId::new("env1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"env1\"");
        assert_eq!(id.to_string(), "env1");

        let id: ResourceId = serde_json::from_str("\"ws1\"").unwrap();
        assert_eq!(id.as_str(), "ws1");
    }

    #[test]
    fn test_promotion_id_display() {
        let id = PromotionId::generate();
        assert!(id.to_string().starts_with("promotion:"));
    }
}
