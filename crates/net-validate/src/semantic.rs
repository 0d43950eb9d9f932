//! Semantic validation for interface state

use nettx_core::error::ValidationError;
use nettx_core::{InterfaceKind, IpAddress, NetError, NetworkState};

/// Semantic validator for interface state
pub struct SemanticValidator {}

impl SemanticValidator {
    pub fn new() -> Self {
        Self {}
    }

    /// Validate state semantics
    pub fn validate_state(&self, state: &NetworkState) -> Result<(), NetError> {
        let mut errors = Vec::new();

        if let Err(e) = self.validate_address_conflicts(state) {
            errors.push(format!("address conflicts: {}", e));
        }

        if let Err(e) = self.validate_dependencies(state) {
            errors.push(format!("interface dependencies: {}", e));
        }

        if let Err(e) = self.validate_kind_constraints(state) {
            errors.push(format!("kind constraints: {}", e));
        }

        if !errors.is_empty() {
            return Err(NetError::Validation(ValidationError::State {
                message: errors.join("; "),
            }));
        }

        Ok(())
    }

    /// No address may be assigned to more than one interface, and a subnet
    /// may not span interfaces (the same interface may carry several
    /// addresses of one subnet)
    fn validate_address_conflicts(&self, state: &NetworkState) -> Result<(), NetError> {
        let mut assigned: Vec<(&str, &IpAddress)> = Vec::new();

        for (name, interface) in &state.interfaces {
            for addr in &interface.addresses {
                for (existing_iface, existing_addr) in &assigned {
                    if addr.addr == existing_addr.addr {
                        return Err(NetError::Validation(ValidationError::AddressConflict {
                            message: format!(
                                "duplicate address {} on interfaces '{}' and '{}'",
                                addr.addr, existing_iface, name
                            ),
                        }));
                    }
                    if *existing_iface != name.as_str() && addr.same_network(existing_addr) {
                        return Err(NetError::Validation(ValidationError::AddressConflict {
                            message: format!(
                                "subnet overlap between {} on '{}' and {} on '{}'",
                                existing_addr, existing_iface, addr, name
                            ),
                        }));
                    }
                }
                assigned.push((name, addr));
            }
        }

        Ok(())
    }

    /// Bridge ports and VLAN parents must exist in the same state
    fn validate_dependencies(&self, state: &NetworkState) -> Result<(), NetError> {
        for (name, interface) in &state.interfaces {
            for dep in interface.kind.dependencies() {
                if !state.contains(dep) {
                    return Err(NetError::Validation(ValidationError::Interface {
                        name: name.clone(),
                        reason: format!(
                            "{} dependency '{}' not defined",
                            interface.kind.kind_name(),
                            dep
                        ),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Kind-specific constraints on dependency targets
    fn validate_kind_constraints(&self, state: &NetworkState) -> Result<(), NetError> {
        for (name, interface) in &state.interfaces {
            match &interface.kind {
                InterfaceKind::Bridge { ports } => {
                    for port in ports {
                        if let Some(port_iface) = state.get(port) {
                            match &port_iface.kind {
                                InterfaceKind::Bridge { .. } => {
                                    return Err(NetError::Validation(
                                        ValidationError::Interface {
                                            name: name.clone(),
                                            reason: format!(
                                                "cannot add bridge '{}' as port to bridge",
                                                port
                                            ),
                                        },
                                    ));
                                }
                                InterfaceKind::Loopback => {
                                    return Err(NetError::Validation(
                                        ValidationError::Interface {
                                            name: name.clone(),
                                            reason: format!(
                                                "cannot add loopback interface '{}' as bridge port",
                                                port
                                            ),
                                        },
                                    ));
                                }
                                _ => {}
                            }
                        }
                    }
                }
                InterfaceKind::Vlan { parent, .. } => {
                    if let Some(parent_iface) = state.get(parent) {
                        if matches!(parent_iface.kind, InterfaceKind::Loopback) {
                            return Err(NetError::Validation(ValidationError::Interface {
                                name: name.clone(),
                                reason: format!(
                                    "VLAN parent '{}' cannot be a loopback interface",
                                    parent
                                ),
                            }));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for SemanticValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettx_core::{AdminState, InterfaceConfig};

    #[test]
    fn test_address_conflict_detection() {
        let validator = SemanticValidator::new();
        let mut state = NetworkState::new();

        state.insert(
            InterfaceConfig::new("dummy0", InterfaceKind::Dummy)
                .with_address("192.168.1.10/24".parse().unwrap())
                .build(),
        );
        state.insert(
            InterfaceConfig::new("dummy1", InterfaceKind::Dummy)
                .with_address("192.168.1.10/24".parse().unwrap())
                .build(),
        );

        assert!(validator.validate_address_conflicts(&state).is_err());
    }

    #[test]
    fn test_subnet_overlap_across_interfaces_rejected() {
        let validator = SemanticValidator::new();
        let mut state = NetworkState::new();

        state.insert(
            InterfaceConfig::new("dummy0", InterfaceKind::Dummy)
                .with_address("10.0.0.1/24".parse().unwrap())
                .build(),
        );
        state.insert(
            InterfaceConfig::new("dummy1", InterfaceKind::Dummy)
                .with_address("10.0.0.2/24".parse().unwrap())
                .build(),
        );

        assert!(validator.validate_address_conflicts(&state).is_err());
    }

    #[test]
    fn test_subnet_shared_on_one_interface_allowed() {
        let validator = SemanticValidator::new();
        let mut state = NetworkState::new();

        state.insert(
            InterfaceConfig::new("dummy0", InterfaceKind::Dummy)
                .with_address("10.0.0.1/24".parse().unwrap())
                .with_address("10.0.0.2/24".parse().unwrap())
                .build(),
        );

        assert!(validator.validate_address_conflicts(&state).is_ok());
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let validator = SemanticValidator::new();
        let mut state = NetworkState::new();

        state.insert(
            InterfaceConfig::new(
                "br0",
                InterfaceKind::Bridge {
                    ports: vec!["nonexistent".to_string()],
                },
            )
            .build(),
        );

        assert!(validator.validate_dependencies(&state).is_err());
    }

    #[test]
    fn test_bridge_in_bridge_rejected() {
        let validator = SemanticValidator::new();
        let mut state = NetworkState::new();

        state.insert(InterfaceConfig::new("br1", InterfaceKind::Bridge { ports: vec![] }).build());
        state.insert(
            InterfaceConfig::new(
                "br0",
                InterfaceKind::Bridge {
                    ports: vec!["br1".to_string()],
                },
            )
            .build(),
        );

        assert!(validator.validate_kind_constraints(&state).is_err());
    }

    #[test]
    fn test_clean_state_passes() {
        let validator = SemanticValidator::new();
        let mut state = NetworkState::new();

        state.insert(
            InterfaceConfig::new("dummy0", InterfaceKind::Dummy)
                .with_address("10.1.0.1/24".parse().unwrap())
                .with_admin_state(AdminState::Up)
                .build(),
        );
        state.insert(
            InterfaceConfig::new(
                "dummy0.100",
                InterfaceKind::Vlan {
                    parent: "dummy0".to_string(),
                    tag: 100,
                },
            )
            .build(),
        );

        assert!(validator.validate_state(&state).is_ok());
    }
}
