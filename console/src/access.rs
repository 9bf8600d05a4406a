//! Credential gate for remote introspection.

use model::{ConsoleError, ConsoleResult, Environment};

/// Decides whether an environment may be introspected.
///
/// A closed gate fails fast with `CredentialMissing` so no remote call is
/// ever attempted without a credential.
pub struct AccessGate;

impl AccessGate {
    pub fn can_introspect(environment: &Environment) -> bool {
        environment.has_credential
    }

    pub fn require(environment: &Environment) -> ConsoleResult<()> {
        if Self::can_introspect(environment) {
            Ok(())
        } else {
            Err(ConsoleError::credential_missing(&environment.id))
        }
    }

    /// Listing the console's own (master) environment is local and needs no
    /// credential; any other environment is foreign introspection.
    pub fn require_listing(environment: &Environment) -> ConsoleResult<()> {
        if environment.is_master {
            return Ok(());
        }
        Self::require(environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{EnvironmentId, ErrorKind, Stage};

    fn environment(is_master: bool, has_credential: bool) -> Environment {
        Environment {
            id: EnvironmentId::new("env3"),
            name: "Production".to_string(),
            domain: "lowcoder-prod.company.com".to_string(),
            stage: Stage::Production,
            is_master,
            has_credential,
            can_delete: !is_master,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_gate_follows_credential() {
        assert!(AccessGate::can_introspect(&environment(false, true)));
        assert!(!AccessGate::can_introspect(&environment(false, false)));
        assert!(AccessGate::require(&environment(false, true)).is_ok());

        let err = AccessGate::require(&environment(false, false)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialMissing);
    }

    #[test]
    fn test_master_listing_is_local() {
        assert!(AccessGate::require_listing(&environment(true, false)).is_ok());
        assert!(AccessGate::require_listing(&environment(false, false)).is_err());
        // stats are always remote, even for the master
        assert!(AccessGate::require(&environment(true, false)).is_err());
    }
}
