//! Declared invariants a committed state must satisfy

use serde::{Deserialize, Serialize};

use crate::types::{IpAddress, NetworkState};

/// A condition every committed state must uphold.
///
/// Invariants are declared against the session and judged on the projected
/// post-commit state only; no live probing is performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Invariant {
    /// The address must stay assigned to an administratively-up interface
    AddressRequired { address: IpAddress },
}

impl Invariant {
    /// Stable name used in violation reports
    pub fn name(&self) -> String {
        match self {
            Invariant::AddressRequired { address } => {
                format!("address-required({})", address)
            }
        }
    }

    /// Check whether the invariant holds in the given state
    pub fn holds(&self, state: &NetworkState) -> bool {
        match self {
            Invariant::AddressRequired { address } => state
                .interfaces
                .values()
                .any(|iface| iface.admin_state.is_up() && iface.has_address(address)),
        }
    }

    /// Human-readable reason for a failed check
    pub fn explain(&self, state: &NetworkState) -> String {
        match self {
            Invariant::AddressRequired { address } => {
                let carrier = state
                    .interfaces
                    .values()
                    .find(|iface| iface.has_address(address));
                match carrier {
                    Some(iface) => format!(
                        "address {} is assigned to {} but the interface is administratively down",
                        address, iface.name
                    ),
                    None => format!("address {} is not assigned to any interface", address),
                }
            }
        }
    }
}

/// Set of declared invariants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvariantSet {
    invariants: Vec<Invariant>,
}

impl InvariantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an invariant; duplicates are ignored
    pub fn declare(&mut self, invariant: Invariant) {
        if !self.invariants.contains(&invariant) {
            self.invariants.push(invariant);
        }
    }

    /// Withdraw a previously declared invariant
    pub fn withdraw(&mut self, invariant: &Invariant) {
        self.invariants.retain(|i| i != invariant);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Invariant> {
        self.invariants.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }
}
