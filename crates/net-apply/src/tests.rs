//! End-to-end tests for transactional interface configuration

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use nettx_core::{
    AdminState, Interface, InterfaceConfig, InterfaceKind, Invariant, NetworkState,
};
use nettx_validate::StateValidator;

use crate::applier::{MemoryApplier, MockSystemApplier, SystemApplier};
use crate::rollback::RollbackManager;
use crate::transaction::{Operation, TransactionManager, TransactionState};

struct Fixture {
    manager: TransactionManager,
    applier: Arc<MemoryApplier>,
    rollback: Arc<RollbackManager>,
    _temp: TempDir,
}

async fn fixture() -> Fixture {
    fixture_with_applier(Arc::new(MemoryApplier::new())).await
}

async fn fixture_with_applier(applier: Arc<MemoryApplier>) -> Fixture {
    let temp = TempDir::new().unwrap();
    let rollback = Arc::new(
        RollbackManager::new(temp.path().join("rollback"))
            .await
            .unwrap(),
    );
    let manager = TransactionManager::new(
        applier.clone(),
        Arc::new(StateValidator::new()),
        rollback.clone(),
        temp.path().join("transactions"),
    )
    .await
    .unwrap();

    Fixture {
        manager,
        applier,
        rollback,
        _temp: temp,
    }
}

fn dummy_iface() -> Interface {
    InterfaceConfig::new("dummy0", InterfaceKind::Dummy).build()
}

async fn commit_dummy_up(fx: &Fixture) {
    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::AddInterface(dummy_iface()))
        .stage(Operation::AddAddress {
            name: "dummy0".to_string(),
            address: "10.1.0.1/24".parse().unwrap(),
        })
        .stage(Operation::SetAdminState {
            name: "dummy0".to_string(),
            state: AdminState::Up,
        });

    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(result.success, "seed commit failed: {:?}", result.error);
}

#[tokio::test]
async fn test_add_commit_creates_interface() {
    let fx = fixture().await;
    commit_dummy_up(&fx).await;

    let state = fx.applier.current_state().await.unwrap();
    let iface = state.get("dummy0").expect("interface must exist");
    assert_eq!(iface.kind, InterfaceKind::Dummy);
    assert!(iface.admin_state.is_up());
    assert!(iface.has_address(&"10.1.0.1/24".parse().unwrap()));

    // Committed transactions leave no rollback points or open transactions
    assert_eq!(fx.rollback.stats().await.unwrap().total_rollback_points, 0);
    assert!(fx.manager.active_transactions().await.is_empty());
}

#[tokio::test]
async fn test_invariant_violating_remove_is_rejected() {
    let fx = fixture().await;
    commit_dummy_up(&fx).await;

    fx.manager
        .declare_invariant(Invariant::AddressRequired {
            address: "10.1.0.1/24".parse().unwrap(),
        })
        .await;

    let before = fx.applier.current_state().await.unwrap();

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::RemoveInterface {
        name: "dummy0".to_string(),
    });

    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("address-required"));
    assert_eq!(txn.state, TransactionState::Failed);

    // The interface survives with its prior configuration unchanged
    let after = fx.applier.current_state().await.unwrap();
    assert_eq!(after, before);
    assert!(after.get("dummy0").unwrap().admin_state.is_up());
}

#[tokio::test]
async fn test_invariant_violating_down_is_rejected() {
    let fx = fixture().await;
    commit_dummy_up(&fx).await;

    fx.manager
        .declare_invariant(Invariant::AddressRequired {
            address: "10.1.0.1/24".parse().unwrap(),
        })
        .await;

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::SetAdminState {
        name: "dummy0".to_string(),
        state: AdminState::Down,
    });

    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("administratively down"));
    assert!(fx
        .applier
        .current_state()
        .await
        .unwrap()
        .get("dummy0")
        .unwrap()
        .admin_state
        .is_up());
}

#[tokio::test]
async fn test_withdrawn_invariant_allows_remove() {
    let fx = fixture().await;
    commit_dummy_up(&fx).await;

    let invariant = Invariant::AddressRequired {
        address: "10.1.0.1/24".parse().unwrap(),
    };
    fx.manager.declare_invariant(invariant.clone()).await;

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::RemoveInterface {
        name: "dummy0".to_string(),
    });
    assert!(!fx.manager.commit(&mut txn).await.unwrap().success);

    fx.manager.withdraw_invariant(&invariant).await;

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::RemoveInterface {
        name: "dummy0".to_string(),
    });
    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(result.success, "remove failed: {:?}", result.error);
    assert!(fx.applier.current_state().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recommit_is_idempotent() {
    let fx = fixture().await;
    commit_dummy_up(&fx).await;

    let before = fx.applier.current_state().await.unwrap();

    // Same sequence again with no intervening changes
    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::AddInterface({
        let mut iface = dummy_iface();
        iface.addresses.push("10.1.0.1/24".parse().unwrap());
        iface.admin_state = AdminState::Up;
        iface
    }))
    .stage(Operation::AddAddress {
        name: "dummy0".to_string(),
        address: "10.1.0.1/24".parse().unwrap(),
    })
    .stage(Operation::SetAdminState {
        name: "dummy0".to_string(),
        state: AdminState::Up,
    });

    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(result.success, "re-commit failed: {:?}", result.error);
    assert!(result.applied_changes.is_empty());
    assert_eq!(fx.applier.current_state().await.unwrap(), before);
}

#[tokio::test]
async fn test_mid_apply_failure_reverts_everything() {
    let fx = fixture().await;

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::AddInterface(
        InterfaceConfig::new("dummy0", InterfaceKind::Dummy).build(),
    ))
    .stage(Operation::AddInterface(
        InterfaceConfig::new("dummy1", InterfaceKind::Dummy).build(),
    ));

    // First create succeeds, second fails
    fx.applier.fail_after(1).await;

    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("injected fault"));

    // The first create was reverted; the system is back to empty
    let state = fx.applier.current_state().await.unwrap();
    assert!(state.is_empty());

    // Clean revert leaves no rollback point behind
    assert_eq!(fx.rollback.stats().await.unwrap().total_rollback_points, 0);
}

#[tokio::test]
async fn test_failed_revert_reports_partial_rollback() {
    let fx = fixture().await;

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::AddInterface(
        InterfaceConfig::new("dummy0", InterfaceKind::Dummy).build(),
    ))
    .stage(Operation::AddInterface(
        InterfaceConfig::new("dummy1", InterfaceKind::Dummy).build(),
    ));

    // Second create fails, then the revert of the first fails too
    fx.applier.fail_at(&[1, 2]).await;

    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(!result.success);
    assert_eq!(txn.state, TransactionState::Failed);

    // The error names what was reverted and what is stranded
    let error = result.error.unwrap();
    assert!(error.contains("Partial rollback"), "got: {}", error);
    assert!(error.contains("dummy0"), "got: {}", error);

    // dummy0 could not be removed and is still on the system
    let state = fx.applier.current_state().await.unwrap();
    assert!(state.contains("dummy0"));
    assert!(!state.contains("dummy1"));

    // The rollback point is kept for manual recovery
    assert_eq!(fx.rollback.stats().await.unwrap().total_rollback_points, 1);
}

#[tokio::test]
async fn test_semantic_failure_rejects_whole_batch() {
    let fx = fixture().await;

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::AddInterface(
        InterfaceConfig::new(
            "br0",
            InterfaceKind::Bridge {
                ports: vec!["missing0".to_string()],
            },
        )
        .build(),
    ));

    let result = fx.manager.commit(&mut txn).await.unwrap();
    assert!(!result.success);
    assert!(fx.applier.current_state().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_discarded_transaction_is_dropped() {
    let fx = fixture().await;

    let mut txn = fx.manager.begin().await.unwrap();
    txn.stage(Operation::AddInterface(dummy_iface()));
    assert_eq!(fx.manager.active_transactions().await.len(), 1);

    fx.manager.rollback(&mut txn).await.unwrap();
    assert_eq!(txn.state, TransactionState::RolledBack);
    assert!(fx.manager.active_transactions().await.is_empty());
    assert!(fx.applier.current_state().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_commit_never_touches_the_applier() {
    let temp = TempDir::new().unwrap();

    let mut mock = MockSystemApplier::new();
    // One snapshot at begin, one at commit; no mutations whatsoever
    mock.expect_current_state()
        .times(2)
        .returning(|| Ok(NetworkState::new()));
    mock.expect_create_interface().never();
    mock.expect_delete_interface().never();
    mock.expect_set_admin_state().never();

    let rollback = Arc::new(
        RollbackManager::new(temp.path().join("rollback"))
            .await
            .unwrap(),
    );
    let manager = TransactionManager::new(
        Arc::new(mock),
        Arc::new(StateValidator::new()),
        rollback,
        temp.path().join("transactions"),
    )
    .await
    .unwrap();

    let mut txn = manager.begin().await.unwrap();
    txn.stage(Operation::RemoveInterface {
        name: "ghost0".to_string(),
    });

    let result = manager.commit(&mut txn).await.unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("ghost0"));
}

#[tokio::test]
async fn test_transaction_log_written() {
    let temp = TempDir::new().unwrap();
    let applier: Arc<MemoryApplier> = Arc::new(MemoryApplier::new());
    let rollback = Arc::new(
        RollbackManager::new(temp.path().join("rollback"))
            .await
            .unwrap(),
    );
    let log_dir: PathBuf = temp.path().join("transactions");
    let manager = TransactionManager::new(
        applier,
        Arc::new(StateValidator::new()),
        rollback,
        log_dir.clone(),
    )
    .await
    .unwrap();

    let mut txn = manager.begin().await.unwrap();
    txn.stage(Operation::AddInterface(dummy_iface()));
    let result = manager.commit(&mut txn).await.unwrap();
    assert!(result.success);

    let log = std::fs::read_to_string(log_dir.join(format!("{}.log", txn.id))).unwrap();
    assert!(log.contains("transaction created"));
    assert!(log.contains("transaction committed"));
}
