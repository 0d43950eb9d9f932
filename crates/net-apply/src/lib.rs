//! nettx apply
//!
//! Transactional configuration application with rollback support

pub mod applier;
pub mod rollback;
pub mod transaction;

#[cfg(test)]
mod tests;

pub use applier::{CommandResult, IpCommandApplier, MemoryApplier, SystemApplier};
pub use rollback::{RollbackManager, RollbackPoint, RollbackStats};
pub use transaction::{
    diff_states, project, ApplyResult, Change, ChangeKind, Operation, Transaction,
    TransactionManager, TransactionState,
};
