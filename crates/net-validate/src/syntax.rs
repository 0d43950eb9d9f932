//! Syntax validation for interface state

use regex::Regex;

use nettx_core::error::ValidationError;
use nettx_core::{Interface, InterfaceKind, NetError, NetworkState};

/// Syntax validator for interface state
pub struct SyntaxValidator {
    /// Valid interface name pattern
    interface_name_regex: Regex,
    /// Valid MAC address pattern
    mac_address_regex: Regex,
    /// Valid VLAN tag range
    vlan_tag_range: std::ops::RangeInclusive<u16>,
    /// Valid MTU range
    mtu_range: std::ops::RangeInclusive<u16>,
}

impl SyntaxValidator {
    pub fn new() -> Self {
        Self {
            interface_name_regex: Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.-]*$").unwrap(),
            mac_address_regex: Regex::new(
                r"^[0-9a-fA-F]{2}(:[0-9a-fA-F]{2}){5}$",
            )
            .unwrap(),
            vlan_tag_range: 1..=4094,
            mtu_range: 68..=65535,
        }
    }

    /// Validate complete state syntax
    pub fn validate_state(&self, state: &NetworkState) -> Result<(), NetError> {
        let mut errors = Vec::new();

        for (name, interface) in &state.interfaces {
            if let Err(e) = self.validate_interface(interface) {
                errors.push(format!("Interface '{}': {}", name, e));
            }

            if interface.name != *name {
                errors.push(format!(
                    "Interface name mismatch: key '{}' vs name '{}'",
                    name, interface.name
                ));
            }
        }

        if !errors.is_empty() {
            return Err(NetError::Validation(ValidationError::State {
                message: errors.join("; "),
            }));
        }

        Ok(())
    }

    /// Validate individual interface syntax
    pub fn validate_interface(&self, interface: &Interface) -> Result<(), NetError> {
        let mut errors = Vec::new();

        if !self.interface_name_regex.is_match(&interface.name) {
            errors.push("invalid interface name format".to_string());
        }

        if interface.name.len() > 15 {
            errors.push("interface name too long (max 15 characters)".to_string());
        }

        for address in &interface.addresses {
            match address.prefix_len {
                None => errors.push(format!("address {} has no prefix length", address)),
                Some(prefix) => {
                    let max = if address.addr.is_ipv4() { 32 } else { 128 };
                    if prefix > max {
                        errors.push(format!("address {} prefix out of range", address));
                    }
                }
            }
        }

        if let Some(mac) = &interface.mac {
            if !self.mac_address_regex.is_match(&mac.to_string()) {
                errors.push(format!("invalid MAC address: {}", mac));
            }
        }

        if let Some(mtu) = interface.mtu {
            if !self.mtu_range.contains(&mtu) {
                errors.push(format!("MTU {} out of range", mtu));
            }
        }

        if let InterfaceKind::Vlan { tag, .. } = &interface.kind {
            if !self.vlan_tag_range.contains(tag) {
                errors.push(format!("VLAN tag {} out of range", tag));
            }
        }

        if !errors.is_empty() {
            return Err(NetError::Validation(ValidationError::Interface {
                name: interface.name.clone(),
                reason: errors.join("; "),
            }));
        }

        Ok(())
    }
}

impl Default for SyntaxValidator {
    fn default() -> Self {
        Self::new()
    }
}
