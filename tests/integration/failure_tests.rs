//! Remote failures, timeouts and cancellation

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use replica_provider::client::ApiError;
use replica_provider::client::memory::ApiCall;
use replica_provider::controller::OperationTimeouts;
use replica_provider::{Error, ReplicaPhase, ReplicaStatus};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected_before_any_call() {
    let service = Arc::new(create_test_service());
    let reconciler = create_test_reconciler(service.clone());
    let desired = DesiredConfigBuilder::new(TEST_CLUSTER, "read-01")
        .with_size("enormous")
        .build();

    let err = reconciler
        .create(&desired, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ValidationError(_)));
    assert!(service.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_parent_cluster_is_rejected() {
    let service = Arc::new(create_test_service());
    let reconciler = create_test_reconciler(service);
    let desired = create_test_config("C2", "read-01");

    let err = reconciler
        .create(&desired, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteRejected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_name_is_rejected() {
    let service = Arc::new(create_test_service());
    let reconciler = create_test_reconciler(service);
    let desired = create_test_config(TEST_CLUSTER, "read-01");
    let cancel = CancellationToken::new();

    reconciler.create(&desired, &cancel).await.unwrap();
    let err = reconciler.create(&desired, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::RemoteRejected(msg) if msg.contains("conflict")));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_network_is_rejected() {
    let service = Arc::new(create_test_service());
    let reconciler = create_test_reconciler(service);
    let desired = DesiredConfigBuilder::new(TEST_CLUSTER, "read-01")
        .with_network("0b0d6c7a-1d7b-4f3e-8a55-6c1c2f7e9b10")
        .build();

    let err = reconciler
        .create(&desired, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteRejected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_replica_must_be_deleted() {
    let service = Arc::new(create_test_service().with_provisioning_polls(1));
    let reconciler = create_test_reconciler(service.clone());
    let desired = create_test_config(TEST_CLUSTER, "read-01");
    let cancel = CancellationToken::new();

    service.fail_next_provisioning().await;
    let err = reconciler.create(&desired, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::RemoteFailed(_)));
    assert!(!err.is_retryable());

    let failed = reconciler.read(&desired.id()).await.unwrap();
    assert_eq!(failed.status, ReplicaStatus::Failed);
    assert_eq!(failed.phase(), ReplicaPhase::Failed);

    // Neither a no-op pass nor an update may proceed
    let err = reconciler
        .apply(Some(&failed), &desired, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteFailed(_)));

    let resized = DesiredConfigBuilder::new(TEST_CLUSTER, "read-01")
        .with_size("db-s-4vcpu-8gb")
        .with_tags(["staging"])
        .build();
    let err = reconciler
        .apply(Some(&failed), &resized, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteFailed(_)));

    reconciler.destroy(&failed, &cancel).await.unwrap();
    assert!(!service.contains(&desired.id()).await);
}

#[tokio::test(start_paused = true)]
async fn test_create_times_out() {
    let service = Arc::new(create_test_service().with_provisioning_polls(100));
    let mut config = test_reconciler_config();
    config.timeouts = OperationTimeouts {
        create: Duration::from_secs(5),
        ..config.timeouts
    };
    let reconciler = create_test_reconciler_with(service.clone(), config);
    let desired = create_test_config(TEST_CLUSTER, "read-01");

    let err = reconciler
        .create(&desired, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.is_retryable());
    // The half-provisioned replica is left for the next pass to pick up
    assert!(service.contains(&desired.id()).await);
}

#[tokio::test(start_paused = true)]
async fn test_apply_resumes_unfinished_create() {
    let service = Arc::new(create_test_service().with_provisioning_polls(8));
    let mut config = test_reconciler_config();
    config.timeouts.create = Duration::from_secs(5);
    let reconciler = create_test_reconciler_with(service.clone(), config);
    let desired = create_test_config(TEST_CLUSTER, "read-01");
    let cancel = CancellationToken::new();

    let err = reconciler.create(&desired, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    let pending = reconciler.read(&desired.id()).await.unwrap();
    assert_eq!(pending.phase(), ReplicaPhase::Creating);

    let state = reconciler
        .apply(Some(&pending), &desired, &cancel)
        .await
        .unwrap();
    assert_eq!(state.status, ReplicaStatus::Online);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_errors_are_tolerated() {
    let service = Arc::new(create_test_service().with_provisioning_polls(1));
    let reconciler = create_test_reconciler(service.clone());
    let desired = create_test_config(TEST_CLUSTER, "read-01");

    service
        .inject_get_errors([
            ApiError::NotFound("eventual consistency".to_string()),
            ApiError::Transient("502 bad gateway".to_string()),
        ])
        .await;

    let state = reconciler
        .create(&desired, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(state.status, ReplicaStatus::Online);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_poll_errors_escalate() {
    let service = Arc::new(create_test_service());
    let reconciler = create_test_reconciler(service.clone());
    let desired = create_test_config(TEST_CLUSTER, "read-01");

    service
        .inject_get_errors((0..10).map(|_| ApiError::Transient("503".to_string())))
        .await;

    let err = reconciler
        .create(&desired, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientError(_)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_create_leaves_replica() {
    let service = Arc::new(create_test_service().with_provisioning_polls(100));
    let reconciler = create_test_reconciler(service.clone());
    let desired = create_test_config(TEST_CLUSTER, "read-01");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5500)).await;
        trigger.cancel();
    });

    let err = reconciler.create(&desired, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(service.contains(&desired.id()).await);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_create_makes_no_call() {
    let service = Arc::new(create_test_service());
    let reconciler = create_test_reconciler(service.clone());
    let desired = create_test_config(TEST_CLUSTER, "read-01");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = reconciler.create(&desired, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(!service.contains(&desired.id()).await);
}

#[tokio::test(start_paused = true)]
async fn test_apply_resize_waits_for_unfinished_create() {
    let service = Arc::new(create_test_service().with_provisioning_polls(8));
    let mut config = test_reconciler_config();
    config.timeouts.create = Duration::from_secs(3);
    let reconciler = create_test_reconciler_with(service.clone(), config);
    let desired = create_test_config(TEST_CLUSTER, "read-01");
    let cancel = CancellationToken::new();

    let err = reconciler.create(&desired, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    let pending = reconciler.read(&desired.id()).await.unwrap();
    assert_eq!(pending.phase(), ReplicaPhase::Creating);

    let resized = DesiredConfigBuilder::new(TEST_CLUSTER, "read-01")
        .with_size("db-s-4vcpu-8gb")
        .with_tags(["staging"])
        .build();
    let state = reconciler
        .apply(Some(&pending), &resized, &cancel)
        .await
        .unwrap();

    assert_eq!(state.status, ReplicaStatus::Online);
    assert_eq!(state.size, "db-s-4vcpu-8gb");
    let updates = service
        .calls()
        .await
        .into_iter()
        .filter(|call| matches!(call, ApiCall::Update(..)))
        .count();
    assert_eq!(updates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_apply_rename_waits_for_unfinished_update() {
    let service = Arc::new(create_test_service().with_provisioning_polls(8));
    let mut config = test_reconciler_config();
    config.timeouts.update = Duration::from_secs(3);
    let reconciler = create_test_reconciler_with(service.clone(), config);
    let desired = create_test_config(TEST_CLUSTER, "read-01");
    let cancel = CancellationToken::new();

    let created = reconciler.apply(None, &desired, &cancel).await.unwrap();
    let resized = DesiredConfigBuilder::new(TEST_CLUSTER, "read-01")
        .with_size("db-s-4vcpu-8gb")
        .with_tags(["staging"])
        .build();
    let err = reconciler
        .apply(Some(&created), &resized, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    let pending = reconciler.read(&desired.id()).await.unwrap();
    assert_eq!(pending.phase(), ReplicaPhase::Updating);

    let renamed = DesiredConfigBuilder::new(TEST_CLUSTER, "read-02")
        .with_size("db-s-4vcpu-8gb")
        .with_tags(["staging"])
        .build();
    let replacement = reconciler
        .apply(Some(&pending), &renamed, &cancel)
        .await
        .unwrap();

    assert_eq!(replacement.name, "read-02");
    assert_eq!(replacement.status, ReplicaStatus::Online);
    assert!(!service.contains(&desired.id()).await);
}
