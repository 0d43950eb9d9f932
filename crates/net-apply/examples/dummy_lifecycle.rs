//! Dummy interface lifecycle: create, address, bring up, commit; then try a
//! removal that a declared invariant rejects, withdraw the invariant and
//! remove for real.
//!
//! Runs against the in-memory applier, so no privileges are required.

use std::sync::Arc;

use anyhow::Result;

use nettx_apply::{MemoryApplier, Operation, RollbackManager, SystemApplier, TransactionManager};
use nettx_core::{AdminState, InterfaceConfig, InterfaceKind, Invariant};
use nettx_validate::StateValidator;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let temp = tempfile::tempdir()?;
    let applier = Arc::new(MemoryApplier::new());
    let rollback = Arc::new(RollbackManager::new(temp.path().join("rollback")).await?);
    let manager = TransactionManager::new(
        applier.clone(),
        Arc::new(StateValidator::new()),
        rollback,
        temp.path().join("transactions"),
    )
    .await?;

    // interfaces add ifname dummy0 kind dummy; dummy0 add_ip 10.1.0.1/24;
    // dummy0 state up; commit
    let mut txn = manager.begin().await?;
    txn.stage(Operation::AddInterface(
        InterfaceConfig::new("dummy0", InterfaceKind::Dummy).build(),
    ))
    .stage(Operation::AddAddress {
        name: "dummy0".to_string(),
        address: "10.1.0.1/24".parse()?,
    })
    .stage(Operation::SetAdminState {
        name: "dummy0".to_string(),
        state: AdminState::Up,
    });

    let result = manager.commit(&mut txn).await?;
    println!(
        "commit 1: success={} changes={}",
        result.success,
        result.applied_changes.len()
    );

    // The address must stay reachable from now on
    manager
        .declare_invariant(Invariant::AddressRequired {
            address: "10.1.0.1/24".parse()?,
        })
        .await;

    // dummy0 remove; commit -- must be rejected
    let mut txn = manager.begin().await?;
    txn.stage(Operation::RemoveInterface {
        name: "dummy0".to_string(),
    });

    let result = manager.commit(&mut txn).await?;
    println!(
        "commit 2: success={} error={}",
        result.success,
        result.error.as_deref().unwrap_or("-")
    );

    let state = applier.current_state().await?;
    println!(
        "dummy0 still present: {} (admin {})",
        state.contains("dummy0"),
        state.get("dummy0").map(|i| i.admin_state).unwrap()
    );

    // Withdrawing the invariant lets the removal through
    manager
        .withdraw_invariant(&Invariant::AddressRequired {
            address: "10.1.0.1/24".parse()?,
        })
        .await;

    let mut txn = manager.begin().await?;
    txn.stage(Operation::RemoveInterface {
        name: "dummy0".to_string(),
    });

    let result = manager.commit(&mut txn).await?;
    println!(
        "commit 3: success={} dummy0 present={}",
        result.success,
        applier.current_state().await?.contains("dummy0")
    );

    Ok(())
}
