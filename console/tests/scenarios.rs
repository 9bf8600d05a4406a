//! End-to-end scenarios driven through the `Console` facade.

use console::{Console, FleetFile};
use model::prelude::*;
use std::sync::Arc;

struct Fleet {
    console: Console,
    a: EnvironmentId,
    b: EnvironmentId,
    r: ResourceId,
}

/// `{A(master), B}`, B has a credential, R owned by A and managed
async fn two_environments() -> Fleet {
    let console = Console::new(ConsoleConfig::default()).unwrap();
    let a = console
        .create_environment("A", "a.example.com", Stage::Development)
        .await
        .unwrap()
        .id;
    let b = console
        .create_environment("B", "b.example.com", Stage::Testing)
        .await
        .unwrap()
        .id;
    console.set_credential(&b, "sk-b").await.unwrap();
    let r = console
        .register_resource(NewResource::workspace(a.clone(), "R").managed(true))
        .await
        .unwrap()
        .id;
    Fleet { console, a, b, r }
}

#[tokio::test]
async fn test_promote_into_credentialed_target() {
    let fleet = two_environments().await;
    let record = fleet
        .console
        .promote(&fleet.r, &fleet.b, PromotionOptions::copy_config(true))
        .await
        .unwrap();

    assert_eq!(record.resource_id, fleet.r);
    assert_eq!(record.target_environment_id, fleet.b);
    assert!(record.copy_config);

    let summary = fleet.console.resource(&fleet.r).unwrap();
    assert_eq!(summary.deployed_to, vec![fleet.b.clone()]);
    assert_eq!(summary.owner_environment_id, fleet.a);
    assert_eq!(fleet.console.history(Some(&fleet.r)).await, vec![record]);
}

#[tokio::test]
async fn test_promote_into_owner_fails() {
    let fleet = two_environments().await;
    let err = fleet
        .console
        .promote(&fleet.r, &fleet.a, PromotionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(
        err.violation(),
        Some(&PreconditionViolation::DeployToOwnEnvironment)
    );
    assert!(err.to_string().contains("cannot deploy to own environment"));
}

#[tokio::test]
async fn test_last_environment_cannot_be_deleted() {
    let console = Console::new(ConsoleConfig::default()).unwrap();
    let a = console
        .create_environment("A", "a.example.com", Stage::Development)
        .await
        .unwrap();

    let err = console.delete_environment(&a.id, "A").await.unwrap_err();
    assert_eq!(err.violation(), Some(&PreconditionViolation::LastEnvironment));
    assert_eq!(console.list_environments().await.len(), 1);
}

#[tokio::test]
async fn test_unmanaged_resource_cannot_be_promoted() {
    let fleet = two_environments().await;
    fleet
        .console
        .promote(&fleet.r, &fleet.b, PromotionOptions::default())
        .await
        .unwrap();
    fleet.console.set_managed(&fleet.r, false).await.unwrap();

    let err = fleet
        .console
        .promote(&fleet.r, &fleet.b, PromotionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.violation(), Some(&PreconditionViolation::NotManaged));
    assert_eq!(
        fleet.console.resource(&fleet.r).unwrap().deployed_to,
        vec![fleet.b.clone()]
    );
}

#[tokio::test]
async fn test_set_master_swaps() {
    let fleet = two_environments().await;
    fleet.console.set_master(&fleet.b).await.unwrap();

    let environments = fleet.console.list_environments().await;
    let a = environments.iter().find(|env| env.id == fleet.a).unwrap();
    let b = environments.iter().find(|env| env.id == fleet.b).unwrap();
    assert!(!a.is_master);
    assert!(b.is_master);
    assert!(a.can_delete);
    assert!(!b.can_delete);
}

#[tokio::test]
async fn test_missing_credential_blocks_promotion_regardless_of_managed() {
    let fleet = two_environments().await;
    let c = fleet
        .console
        .create_environment("C", "c.example.com", Stage::Production)
        .await
        .unwrap()
        .id;

    for managed in [true, false] {
        fleet.console.set_managed(&fleet.r, managed).await.unwrap();
        let err = fleet
            .console
            .promote(&fleet.r, &c, PromotionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialMissing);
        assert!(err.to_string().contains("add an API key"));
    }
}

#[tokio::test]
async fn test_delete_removes_owned_and_scrubs_deployments() {
    let fleet = two_environments().await;
    fleet
        .console
        .promote(&fleet.r, &fleet.b, PromotionOptions::default())
        .await
        .unwrap();
    let local = fleet
        .console
        .register_resource(NewResource::user_group(fleet.b.clone(), "B Team", 3))
        .await
        .unwrap();

    let err = fleet
        .console
        .delete_environment(&fleet.a, "A")
        .await
        .unwrap_err();
    assert_eq!(err.violation(), Some(&PreconditionViolation::MasterEnvironment));

    let err = fleet
        .console
        .delete_environment(&fleet.b, "b")
        .await
        .unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&PreconditionViolation::ConfirmationMismatch)
    );

    fleet.console.delete_environment(&fleet.b, "B").await.unwrap();

    assert!(fleet.console.resource(&fleet.r).unwrap().deployed_to.is_empty());
    assert_eq!(
        fleet.console.resource(&local.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        fleet
            .console
            .promote(&fleet.r, &fleet.b, PromotionOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_validation_failures_change_nothing() {
    let fleet = two_environments().await;
    let before = fleet.console.list_environments().await;

    assert!(fleet.console.rename_environment(&fleet.b, "  ").await.is_err());
    assert!(fleet.console.set_domain(&fleet.b, "").await.is_err());
    assert!(fleet.console.set_credential(&fleet.a, "").await.is_err());
    assert!(fleet
        .console
        .create_environment("", "c.example.com", Stage::Testing)
        .await
        .is_err());

    assert_eq!(fleet.console.list_environments().await, before);
}

#[tokio::test]
async fn test_listing_gate() {
    let fleet = two_environments().await;
    let c = fleet
        .console
        .create_environment("C", "c.example.com", Stage::Production)
        .await
        .unwrap()
        .id;

    // master is local
    assert_eq!(fleet.console.list_resources(&fleet.a, None).await.unwrap().len(), 1);
    assert!(fleet.console.list_resources(&fleet.b, None).await.unwrap().is_empty());
    assert_eq!(
        fleet
            .console
            .list_resources(&c, None)
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::CredentialMissing
    );

    fleet.console.set_credential(&c, "sk-c").await.unwrap();
    assert!(fleet.console.list_resources(&c, None).await.is_ok());
}

#[tokio::test]
async fn test_demo_fleet_walkthrough() {
    let fleet = FleetFile::demo().unwrap();
    let console = Console::new(ConsoleConfig::default())
        .unwrap()
        .with_introspector(Arc::new(fleet.introspector()));
    fleet.apply(&console).await.unwrap();

    let env1 = EnvironmentId::new("env1");
    let env2 = EnvironmentId::new("env2");
    let env3 = EnvironmentId::new("env3");

    let groups = console
        .list_resources(&env1, Some(ResourceKind::UserGroup))
        .await
        .unwrap();
    assert_eq!(groups.len(), 4);

    // Production has no API key yet
    assert_eq!(
        console.environment_stats(&env3).await.unwrap_err().kind(),
        ErrorKind::CredentialMissing
    );
    let targets = console.deployment_targets(&"ws2".into()).await.unwrap();
    assert_eq!(targets.len(), 2);
    assert!(targets.iter().all(|t| t.environment.id != env1));
    assert!(!targets.iter().find(|t| t.environment.id == env3).unwrap().ready);

    let records = console
        .promote_workspace(&"ws1".into(), &env2, console.default_options())
        .await
        .unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["ws1", "app1", "app2", "ds1", "ds2", "q1"]);
    assert_eq!(
        records.iter().filter(|r| r.newly_deployed).count(),
        2,
        "only app2 and ds2 were new to Testing"
    );

    console.set_credential(&env3, "sk-prod").await.unwrap();
    let stats = console.environment_stats(&env3).await;
    assert_eq!(stats.unwrap_err().kind(), ErrorKind::Unavailable);
}
