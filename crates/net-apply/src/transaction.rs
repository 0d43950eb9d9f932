//! Transactional application of staged interface operations
//!
//! Operations are staged into a transaction, projected over the current
//! system state, validated as a whole, and applied atomically. A validation
//! failure rejects the batch before anything touches the system; an apply
//! failure reverts the changes already made.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use nettx_core::error::{ConfigError, SystemError};
use nettx_core::{
    AdminState, Interface, InterfaceValidator, Invariant, InvariantSet, IpAddress, NetError,
    NetworkState, Result,
};
use nettx_validate::StateValidator;

use crate::applier::SystemApplier;
use crate::rollback::RollbackManager;

/// A staged configuration intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Create an interface with the given configuration
    AddInterface(Interface),
    /// Remove an interface
    RemoveInterface { name: String },
    /// Assign an address to an interface
    AddAddress { name: String, address: IpAddress },
    /// Remove an assigned address
    RemoveAddress { name: String, address: IpAddress },
    /// Change administrative state
    SetAdminState { name: String, state: AdminState },
    /// Change MTU
    SetMtu { name: String, mtu: u16 },
}

impl Operation {
    /// Interface the operation targets
    pub fn target(&self) -> &str {
        match self {
            Operation::AddInterface(iface) => &iface.name,
            Operation::RemoveInterface { name }
            | Operation::AddAddress { name, .. }
            | Operation::RemoveAddress { name, .. }
            | Operation::SetAdminState { name, .. }
            | Operation::SetMtu { name, .. } => name,
        }
    }
}

/// Transaction lifecycle states
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TransactionState {
    Created,
    Validating,
    Validated,
    Applying,
    Applied,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

/// Kind of a computed change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One interface-level change computed from the staged operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub target: String,
    pub old: Option<Interface>,
    pub new: Option<Interface>,
    pub description: String,
}

/// A batch of staged operations applied atomically on commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID
    pub id: String,
    /// Creation timestamp (epoch seconds)
    pub timestamp: u64,
    /// Staged operations in submission order
    pub operations: Vec<Operation>,
    /// System state observed when the transaction was opened
    pub pre_state: NetworkState,
    /// Projected post-commit state, set during commit
    pub projected: Option<NetworkState>,
    /// Lifecycle state
    pub state: TransactionState,
    /// Interface-level changes computed during commit
    pub changes: Vec<Change>,
    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}

impl Transaction {
    /// Stage an operation; errors surface at commit, not here
    pub fn stage(&mut self, operation: Operation) -> &mut Self {
        debug!(
            "transaction {}: staged operation for {}",
            self.id,
            operation.target()
        );
        self.operations.push(operation);
        self
    }
}

/// Result of committing a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub transaction_id: String,
    pub success: bool,
    pub applied_changes: Vec<Change>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Project staged operations over a starting state.
///
/// Re-adding an identical interface and re-assigning a present address are
/// no-ops, so a committed sequence projects to the same state when re-run.
pub fn project(pre: &NetworkState, operations: &[Operation]) -> Result<NetworkState> {
    let mut state = pre.clone();

    for operation in operations {
        match operation {
            Operation::AddInterface(iface) => {
                InterfaceValidator::validate_name(&iface.name)?;
                match state.get(&iface.name) {
                    Some(existing) if existing == iface => {}
                    Some(_) => {
                        return Err(NetError::Config(ConfigError::DuplicateInterface {
                            name: iface.name.clone(),
                        }));
                    }
                    None => state.insert(iface.clone()),
                }
            }
            Operation::RemoveInterface { name } => {
                state.remove(name).ok_or_else(|| unknown(name))?;
            }
            Operation::AddAddress { name, address } => {
                let iface = state
                    .interfaces
                    .get_mut(name)
                    .ok_or_else(|| unknown(name))?;
                if !iface.has_address(address) {
                    iface.addresses.push(address.clone());
                }
            }
            Operation::RemoveAddress { name, address } => {
                let iface = state
                    .interfaces
                    .get_mut(name)
                    .ok_or_else(|| unknown(name))?;
                iface.addresses.retain(|a| a.addr != address.addr);
            }
            Operation::SetAdminState { name, state: admin } => {
                let iface = state
                    .interfaces
                    .get_mut(name)
                    .ok_or_else(|| unknown(name))?;
                iface.admin_state = *admin;
            }
            Operation::SetMtu { name, mtu } => {
                let iface = state
                    .interfaces
                    .get_mut(name)
                    .ok_or_else(|| unknown(name))?;
                iface.mtu = Some(*mtu);
            }
        }
    }

    Ok(state)
}

fn unknown(name: &str) -> NetError {
    NetError::Config(ConfigError::UnknownInterface {
        name: name.to_string(),
    })
}

/// Height of the dependent chain stacked on `name` (vlans on a device,
/// bridges over a port). The path guard stops on malformed cyclic states.
fn dependent_height(state: &NetworkState, name: &str, path: &mut Vec<String>) -> usize {
    if path.iter().any(|p| p == name) {
        return 0;
    }
    path.push(name.to_string());
    let height = state
        .dependents_of(name)
        .iter()
        .map(|iface| 1 + dependent_height(state, &iface.name, path))
        .max()
        .unwrap_or(0);
    path.pop();
    height
}

/// Compute interface-level changes between two states.
///
/// Ordered deletes, then updates, then creates; the apply stage walks the
/// list in order. Within the delete group dependents go before the
/// interfaces they depend on (the kernel cascades a vlan away with its
/// parent, so deleting the parent first strands the staged vlan delete);
/// the create group runs the other way round.
pub fn diff_states(pre: &NetworkState, post: &NetworkState) -> Vec<Change> {
    let mut changes = Vec::new();

    for (name, old) in &pre.interfaces {
        if !post.contains(name) {
            changes.push(Change {
                kind: ChangeKind::Delete,
                target: name.clone(),
                old: Some(old.clone()),
                new: None,
                description: format!("delete interface {}", name),
            });
        }
    }

    for (name, new) in &post.interfaces {
        match pre.get(name) {
            Some(old) if old != new => changes.push(Change {
                kind: ChangeKind::Update,
                target: name.clone(),
                old: Some(old.clone()),
                new: Some(new.clone()),
                description: format!("update interface {}", name),
            }),
            Some(_) => {}
            None => changes.push(Change {
                kind: ChangeKind::Create,
                target: name.clone(),
                old: None,
                new: Some(new.clone()),
                description: format!("create interface {}", name),
            }),
        }
    }

    changes.sort_by_key(|c| match c.kind {
        ChangeKind::Delete => (0, dependent_height(pre, &c.target, &mut Vec::new())),
        ChangeKind::Update => (1, 0),
        ChangeKind::Create => (
            2,
            usize::MAX - dependent_height(post, &c.target, &mut Vec::new()),
        ),
    });

    changes
}

/// Transaction manager: stages, validates and atomically applies operations
pub struct TransactionManager {
    /// Backend performing the actual interface operations
    applier: Arc<dyn SystemApplier>,
    /// Validator for projected states
    validator: Arc<StateValidator>,
    /// Rollback point storage
    rollback_manager: Arc<RollbackManager>,
    /// Declared invariants, checked at every commit
    invariants: Mutex<InvariantSet>,
    /// Open transactions by ID
    active_transactions: Mutex<HashMap<String, Transaction>>,
    /// Transaction log directory
    log_dir: PathBuf,
    /// Serializes commits: single writer, submission order
    commit_lock: Mutex<()>,
    /// Monotonic suffix for transaction IDs
    seq: AtomicU64,
}

impl TransactionManager {
    pub async fn new(
        applier: Arc<dyn SystemApplier>,
        validator: Arc<StateValidator>,
        rollback_manager: Arc<RollbackManager>,
        log_dir: PathBuf,
    ) -> Result<Self> {
        if !log_dir.exists() {
            fs::create_dir_all(&log_dir).await?;
        }

        Ok(Self {
            applier,
            validator,
            rollback_manager,
            invariants: Mutex::new(InvariantSet::new()),
            active_transactions: Mutex::new(HashMap::new()),
            log_dir,
            commit_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        })
    }

    /// Declare an invariant every subsequent commit must uphold
    pub async fn declare_invariant(&self, invariant: Invariant) {
        info!("declared invariant {}", invariant.name());
        self.invariants.lock().await.declare(invariant);
    }

    /// Withdraw a previously declared invariant
    pub async fn withdraw_invariant(&self, invariant: &Invariant) {
        info!("withdrew invariant {}", invariant.name());
        self.invariants.lock().await.withdraw(invariant);
    }

    /// Open a new transaction against the current system state
    pub async fn begin(&self) -> Result<Transaction> {
        let id = self.generate_transaction_id();
        let pre_state = self.applier.current_state().await?;

        let transaction = Transaction {
            id: id.clone(),
            timestamp: epoch_secs(),
            operations: Vec::new(),
            pre_state,
            projected: None,
            state: TransactionState::Created,
            changes: Vec::new(),
            metadata: HashMap::new(),
        };

        {
            let mut active = self.active_transactions.lock().await;
            active.insert(id.clone(), transaction.clone());
        }

        self.log_transaction(&transaction, "transaction created")
            .await?;

        info!("created transaction {}", id);
        Ok(transaction)
    }

    /// Commit a transaction: validate the aggregate effect, then apply it
    /// atomically. Failure leaves the system untouched and the result
    /// carries the reason.
    pub async fn commit(&self, transaction: &mut Transaction) -> Result<ApplyResult> {
        let _guard = self.commit_lock.lock().await;
        let start = std::time::Instant::now();

        let result = self.commit_internal(transaction).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(applied_changes) => {
                transaction.state = TransactionState::Committing;
                self.update_transaction(transaction).await?;

                self.rollback_manager
                    .cleanup_rollback_point(&transaction.id)
                    .await?;

                transaction.state = TransactionState::Committed;
                self.finish_transaction(transaction, "transaction committed")
                    .await?;

                info!(
                    "committed transaction {} ({} changes)",
                    transaction.id,
                    applied_changes.len()
                );

                Ok(ApplyResult {
                    transaction_id: transaction.id.clone(),
                    success: true,
                    applied_changes,
                    error: None,
                    duration_ms,
                })
            }
            Err(e) => {
                error!("transaction {} failed: {}", transaction.id, e);

                // Keep the rollback point around if the revert was partial,
                // otherwise it is no longer needed.
                let partial = matches!(
                    e,
                    NetError::System(SystemError::PartialRollback { .. })
                );
                if !partial {
                    if let Err(cleanup_err) = self
                        .rollback_manager
                        .cleanup_rollback_point(&transaction.id)
                        .await
                    {
                        warn!(
                            "failed to clean up rollback point for {}: {}",
                            transaction.id, cleanup_err
                        );
                    }
                }

                transaction.state = TransactionState::Failed;
                self.finish_transaction(transaction, "transaction failed")
                    .await?;

                Ok(ApplyResult {
                    transaction_id: transaction.id.clone(),
                    success: false,
                    applied_changes: Vec::new(),
                    error: Some(e.to_string()),
                    duration_ms,
                })
            }
        }
    }

    /// Discard an open transaction without applying it
    pub async fn rollback(&self, transaction: &mut Transaction) -> Result<()> {
        transaction.state = TransactionState::RolledBack;
        self.finish_transaction(transaction, "transaction discarded")
            .await?;
        info!("discarded transaction {}", transaction.id);
        Ok(())
    }

    /// Get open transactions
    pub async fn active_transactions(&self) -> Vec<Transaction> {
        let active = self.active_transactions.lock().await;
        active.values().cloned().collect()
    }

    /// Get an open transaction by ID
    pub async fn get_transaction(&self, transaction_id: &str) -> Option<Transaction> {
        let active = self.active_transactions.lock().await;
        active.get(transaction_id).cloned()
    }

    async fn commit_internal(&self, transaction: &mut Transaction) -> Result<Vec<Change>> {
        info!(
            "committing transaction {} ({} operations)",
            transaction.id,
            transaction.operations.len()
        );

        // Stage 1: project and validate against the current system state
        transaction.state = TransactionState::Validating;
        self.update_transaction(transaction).await?;

        let pre = self.applier.current_state().await?;
        let post = project(&pre, &transaction.operations)?;
        let changes = diff_states(&pre, &post);

        self.validator.validate_state(&post)?;
        {
            let invariants = self.invariants.lock().await;
            self.validator.check_invariants(&pre, &post, &invariants)?;
        }

        transaction.pre_state = pre.clone();
        transaction.projected = Some(post);
        transaction.changes = changes.clone();
        transaction.state = TransactionState::Validated;
        self.update_transaction(transaction).await?;

        if changes.is_empty() {
            info!("transaction {} is a no-op", transaction.id);
            return Ok(Vec::new());
        }

        // Stage 2: snapshot the pre-state
        self.rollback_manager
            .create_rollback_point(&transaction.id, &pre)
            .await?;

        // Stage 3: apply changes, reverting on failure
        transaction.state = TransactionState::Applying;
        self.update_transaction(transaction).await?;

        match self.apply_changes(&changes).await {
            Ok(applied) => {
                transaction.state = TransactionState::Applied;
                self.update_transaction(transaction).await?;
                Ok(applied)
            }
            Err((applied_so_far, apply_err)) => {
                warn!(
                    "transaction {} failed after {} of {} changes, reverting",
                    transaction.id,
                    applied_so_far.len(),
                    changes.len()
                );

                transaction.state = TransactionState::RollingBack;
                self.update_transaction(transaction).await?;

                self.revert_changes(&applied_so_far).await?;

                // Verify against the snapshot; drift means something outside
                // the transaction changed the system underneath us.
                let snapshot = self
                    .rollback_manager
                    .restore_rollback_point(&transaction.id)
                    .await?;
                let now = self.applier.current_state().await?;
                if now != snapshot {
                    warn!(
                        "state drift detected after reverting transaction {}",
                        transaction.id
                    );
                }

                transaction.state = TransactionState::RolledBack;
                self.update_transaction(transaction).await?;

                Err(apply_err)
            }
        }
    }

    /// Apply changes in order; on failure return what was already applied
    async fn apply_changes(
        &self,
        changes: &[Change],
    ) -> std::result::Result<Vec<Change>, (Vec<Change>, NetError)> {
        let mut applied = Vec::new();

        for change in changes {
            match self.apply_single_change(change).await {
                Ok(()) => {
                    debug!("applied: {}", change.description);
                    applied.push(change.clone());
                }
                Err(e) => return Err((applied, e)),
            }
        }

        Ok(applied)
    }

    async fn apply_single_change(&self, change: &Change) -> Result<()> {
        match change.kind {
            ChangeKind::Create => {
                let new = change.new.as_ref().ok_or_else(|| missing_side(change))?;
                info!("creating {}: {}", change.target, change.description);
                self.applier.create_interface(new).await
            }
            ChangeKind::Delete => {
                info!("deleting {}: {}", change.target, change.description);
                // Bring the interface down before removal
                if let Err(e) = self
                    .applier
                    .set_admin_state(&change.target, AdminState::Down)
                    .await
                {
                    warn!("failed to bring down {}: {}", change.target, e);
                }
                self.applier.delete_interface(&change.target).await
            }
            ChangeKind::Update => {
                let old = change.old.as_ref().ok_or_else(|| missing_side(change))?;
                let new = change.new.as_ref().ok_or_else(|| missing_side(change))?;
                info!("updating {}: {}", change.target, change.description);
                self.apply_interface_delta(old, new).await
            }
        }
    }

    /// Apply the field-level difference between two versions of an interface
    async fn apply_interface_delta(&self, old: &Interface, new: &Interface) -> Result<()> {
        for address in &old.addresses {
            if !new.has_address(address) {
                self.applier.remove_address(&new.name, address).await?;
            }
        }
        for address in &new.addresses {
            if !old.has_address(address) {
                self.applier.add_address(&new.name, address).await?;
            }
        }

        if old.mtu != new.mtu {
            if let Some(mtu) = new.mtu {
                self.applier.set_mtu(&new.name, mtu).await?;
            }
        }

        if old.admin_state != new.admin_state {
            self.applier
                .set_admin_state(&new.name, new.admin_state)
                .await?;
        }

        Ok(())
    }

    /// Revert applied changes in reverse order; a revert that itself fails
    /// is reported distinctly as a partial rollback.
    async fn revert_changes(&self, applied: &[Change]) -> Result<()> {
        let mut reverted = Vec::new();
        let mut stranded = Vec::new();

        for change in applied.iter().rev() {
            match self.revert_single_change(change).await {
                Ok(()) => {
                    debug!("reverted: {}", change.description);
                    reverted.push(change.target.clone());
                }
                Err(e) => {
                    error!("failed to revert {}: {}", change.description, e);
                    stranded.push(change.target.clone());
                }
            }
        }

        if stranded.is_empty() {
            Ok(())
        } else {
            Err(NetError::System(SystemError::PartialRollback {
                reverted,
                stranded,
            }))
        }
    }

    async fn revert_single_change(&self, change: &Change) -> Result<()> {
        match change.kind {
            ChangeKind::Create => self.applier.delete_interface(&change.target).await,
            ChangeKind::Delete => {
                let old = change.old.as_ref().ok_or_else(|| missing_side(change))?;
                self.applier.create_interface(old).await
            }
            ChangeKind::Update => {
                let old = change.old.as_ref().ok_or_else(|| missing_side(change))?;
                let new = change.new.as_ref().ok_or_else(|| missing_side(change))?;
                self.apply_interface_delta(new, old).await
            }
        }
    }

    /// Re-register the transaction and log its state change
    async fn update_transaction(&self, transaction: &Transaction) -> Result<()> {
        {
            let mut active = self.active_transactions.lock().await;
            active.insert(transaction.id.clone(), transaction.clone());
        }

        self.log_transaction(
            transaction,
            &format!("state changed to {:?}", transaction.state),
        )
        .await
    }

    /// Log, then drop the transaction from the active set
    async fn finish_transaction(&self, transaction: &Transaction, message: &str) -> Result<()> {
        self.log_transaction(transaction, message).await?;
        let mut active = self.active_transactions.lock().await;
        active.remove(&transaction.id);
        Ok(())
    }

    /// Append a JSON line to the per-transaction log file
    async fn log_transaction(&self, transaction: &Transaction, message: &str) -> Result<()> {
        let entry = serde_json::json!({
            "timestamp": epoch_secs(),
            "transaction_id": transaction.id,
            "state": transaction.state,
            "message": message,
            "operations": transaction.operations.len(),
            "changes": transaction.changes.len(),
        });

        let log_file = self.log_dir.join(format!("{}.log", transaction.id));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .await?;
        file.write_all(format!("{}\n", entry).as_bytes()).await?;

        Ok(())
    }

    fn generate_transaction_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("txn_{}_{}", millis, seq)
    }
}

fn missing_side(change: &Change) -> NetError {
    NetError::Config(ConfigError::MissingField {
        field: format!("change payload for {}", change.target),
    })
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
