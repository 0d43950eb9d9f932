//! Interface configuration builder and validation

use std::collections::HashMap;

use crate::error::{ConfigError, NetError};
use crate::types::{AdminState, Interface, InterfaceKind, IpAddress, MacAddr};
use crate::Result;

/// Maximum interface name length (IFNAMSIZ - 1)
const MAX_IFNAME_LEN: usize = 15;

/// Interface configuration for staging creates and updates
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub name: String,
    pub kind: InterfaceKind,
    pub addresses: Vec<IpAddress>,
    pub mac: Option<MacAddr>,
    pub mtu: Option<u16>,
    pub admin_state: AdminState,
    pub options: HashMap<String, String>,
}

impl InterfaceConfig {
    /// New interface configuration, administratively down by default
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            addresses: Vec::new(),
            mac: None,
            mtu: None,
            admin_state: AdminState::Down,
            options: HashMap::new(),
        }
    }

    /// Add an IP address
    pub fn with_address(mut self, address: IpAddress) -> Self {
        self.addresses.push(address);
        self
    }

    /// Set MAC address
    pub fn with_mac(mut self, mac: MacAddr) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Set MTU
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Set administrative state
    pub fn with_admin_state(mut self, state: AdminState) -> Self {
        self.admin_state = state;
        self
    }

    /// Add a free-form option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Convert to Interface
    pub fn build(self) -> Interface {
        Interface {
            name: self.name,
            kind: self.kind,
            addresses: self.addresses,
            mac: self.mac,
            mtu: self.mtu,
            admin_state: self.admin_state,
            options: self.options,
        }
    }
}

/// Interface validation functions
pub struct InterfaceValidator;

impl InterfaceValidator {
    /// Validate interface name
    pub fn validate_name(name: &str) -> Result<()> {
        let invalid = || {
            NetError::Config(ConfigError::InvalidInterfaceName {
                name: name.to_string(),
            })
        };

        if name.is_empty() || name.len() > MAX_IFNAME_LEN {
            return Err(invalid());
        }

        // Dots are allowed for VLAN interfaces
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(invalid());
        }

        if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }

        Ok(())
    }

    /// Validate an interface configuration
    pub fn validate_config(config: &InterfaceConfig) -> Result<()> {
        Self::validate_name(&config.name)?;

        if let Some(mtu) = config.mtu {
            if mtu < 68 {
                return Err(NetError::Config(ConfigError::InvalidValue {
                    field: "mtu".to_string(),
                    value: mtu.to_string(),
                }));
            }
        }

        match &config.kind {
            InterfaceKind::Bridge { ports } => {
                for port in ports {
                    Self::validate_name(port)?;
                    if port == &config.name {
                        return Err(NetError::Config(ConfigError::InvalidValue {
                            field: "bridge_ports".to_string(),
                            value: port.clone(),
                        }));
                    }
                }
            }
            InterfaceKind::Vlan { parent, tag } => {
                Self::validate_name(parent)?;
                if *tag == 0 || *tag > 4094 {
                    return Err(NetError::Config(ConfigError::InvalidValue {
                        field: "vlan_tag".to_string(),
                        value: tag.to_string(),
                    }));
                }
            }
            InterfaceKind::Loopback => {
                if config.mac.is_some() {
                    return Err(NetError::Config(ConfigError::InvalidValue {
                        field: "mac".to_string(),
                        value: "loopback interfaces cannot carry a MAC override".to_string(),
                    }));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_name_validation() {
        assert!(InterfaceValidator::validate_name("dummy0").is_ok());
        assert!(InterfaceValidator::validate_name("br-test").is_ok());
        assert!(InterfaceValidator::validate_name("eth0.100").is_ok());

        assert!(InterfaceValidator::validate_name("").is_err());
        assert!(InterfaceValidator::validate_name("0eth").is_err());
        assert!(InterfaceValidator::validate_name("eth@0").is_err());
        assert!(InterfaceValidator::validate_name("very-long-interface-name").is_err());
    }

    #[test]
    fn test_interface_config_validation() {
        let config = InterfaceConfig::new("dummy0", InterfaceKind::Dummy)
            .with_address("192.168.1.10/24".parse().unwrap())
            .with_admin_state(AdminState::Up);
        assert!(InterfaceValidator::validate_config(&config).is_ok());

        let bad_mtu = InterfaceConfig::new("dummy0", InterfaceKind::Dummy).with_mtu(10);
        assert!(InterfaceValidator::validate_config(&bad_mtu).is_err());
    }

    #[test]
    fn test_vlan_validation() {
        let config = InterfaceConfig::new(
            "eth0.100",
            InterfaceKind::Vlan {
                parent: "eth0".to_string(),
                tag: 100,
            },
        );
        assert!(InterfaceValidator::validate_config(&config).is_ok());

        let invalid = InterfaceConfig::new(
            "eth0.5000",
            InterfaceKind::Vlan {
                parent: "eth0".to_string(),
                tag: 5000,
            },
        );
        assert!(InterfaceValidator::validate_config(&invalid).is_err());
    }

    #[test]
    fn test_bridge_self_port_rejected() {
        let config = InterfaceConfig::new(
            "br0",
            InterfaceKind::Bridge {
                ports: vec!["br0".to_string()],
            },
        );
        assert!(InterfaceValidator::validate_config(&config).is_err());
    }

    #[test]
    fn test_builder() {
        let iface = InterfaceConfig::new("dummy0", InterfaceKind::Dummy)
            .with_address("10.0.0.1/24".parse().unwrap())
            .with_mac("aa:bb:cc:dd:ee:ff".parse().unwrap())
            .with_mtu(1400)
            .with_admin_state(AdminState::Up)
            .build();

        assert_eq!(iface.name, "dummy0");
        assert_eq!(iface.mtu, Some(1400));
        assert!(iface.admin_state.is_up());
        assert!(iface.has_address(&"10.0.0.1/24".parse().unwrap()));
    }
}
