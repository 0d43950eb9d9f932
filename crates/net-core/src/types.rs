//! Core data model for interface configuration

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;

use indexmap::IndexMap;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use mac_address::MacAddress;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, NetError};

/// IFF_UP bit in interface flags
const IFF_UP: u32 = 0x1;

/// A network interface as staged or observed on the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub kind: InterfaceKind,
    #[serde(default)]
    pub addresses: Vec<IpAddress>,
    pub mac: Option<MacAddr>,
    pub mtu: Option<u16>,
    pub admin_state: AdminState,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Interface {
    /// Check whether the interface carries the given address
    pub fn has_address(&self, addr: &IpAddress) -> bool {
        self.addresses.iter().any(|a| a.addr == addr.addr)
    }
}

/// Interface kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterfaceKind {
    Dummy,
    Loopback,
    Physical,
    Bridge {
        #[serde(default)]
        ports: Vec<String>,
    },
    Vlan {
        parent: String,
        tag: u16,
    },
}

impl InterfaceKind {
    /// Interfaces this kind depends on (bridge ports, vlan parent)
    pub fn dependencies(&self) -> Vec<&str> {
        match self {
            InterfaceKind::Bridge { ports } => ports.iter().map(String::as_str).collect(),
            InterfaceKind::Vlan { parent, .. } => vec![parent.as_str()],
            _ => Vec::new(),
        }
    }

    /// Kind name as reported by the kernel (IFLA_INFO_KIND)
    pub fn kind_name(&self) -> &'static str {
        match self {
            InterfaceKind::Dummy => "dummy",
            InterfaceKind::Loopback => "loopback",
            InterfaceKind::Physical => "physical",
            InterfaceKind::Bridge { .. } => "bridge",
            InterfaceKind::Vlan { .. } => "vlan",
        }
    }
}

/// Administrative interface state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Up,
    Down,
}

impl AdminState {
    /// Derive administrative state from kernel interface flags
    pub fn from_flags(flags: u32) -> Self {
        if flags & IFF_UP != 0 {
            AdminState::Up
        } else {
            AdminState::Down
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, AdminState::Up)
    }
}

impl FromStr for AdminState {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(AdminState::Up),
            "down" => Ok(AdminState::Down),
            other => Err(NetError::Config(ConfigError::InvalidValue {
                field: "admin_state".to_string(),
                value: other.to_string(),
            })),
        }
    }
}

impl std::fmt::Display for AdminState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminState::Up => write!(f, "up"),
            AdminState::Down => write!(f, "down"),
        }
    }
}

/// IP address with optional prefix length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAddress {
    pub addr: IpAddr,
    pub prefix_len: Option<u8>,
}

impl IpAddress {
    pub fn new(addr: IpAddr, prefix_len: Option<u8>) -> Self {
        Self { addr, prefix_len }
    }

    pub fn to_ipnet(&self) -> Option<IpNet> {
        self.prefix_len.and_then(|prefix| match self.addr {
            IpAddr::V4(addr) => Ipv4Net::new(addr, prefix).ok().map(IpNet::V4),
            IpAddr::V6(addr) => Ipv6Net::new(addr, prefix).ok().map(IpNet::V6),
        })
    }

    pub fn same_network(&self, other: &IpAddress) -> bool {
        match (self.to_ipnet(), other.to_ipnet()) {
            (Some(net1), Some(net2)) => net1.contains(&other.addr) || net2.contains(&self.addr),
            _ => false,
        }
    }
}

impl FromStr for IpAddress {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((addr, prefix)) = s.split_once('/') {
            let addr = addr.parse::<IpAddr>().map_err(|_| {
                NetError::Config(ConfigError::InvalidValue {
                    field: "ip_address".to_string(),
                    value: s.to_string(),
                })
            })?;
            let prefix_len = prefix.parse::<u8>().map_err(|_| {
                NetError::Config(ConfigError::InvalidValue {
                    field: "prefix_length".to_string(),
                    value: prefix.to_string(),
                })
            })?;
            Ok(IpAddress::new(addr, Some(prefix_len)))
        } else {
            let addr = s.parse::<IpAddr>().map_err(|_| {
                NetError::Config(ConfigError::InvalidValue {
                    field: "ip_address".to_string(),
                    value: s.to_string(),
                })
            })?;
            Ok(IpAddress::new(addr, None))
        }
    }
}

impl std::fmt::Display for IpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(prefix) = self.prefix_len {
            write!(f, "{}/{}", self.addr, prefix)
        } else {
            write!(f, "{}", self.addr)
        }
    }
}

/// MAC address newtype with string serde representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacAddr(pub MacAddress);

struct MacAddrVisitor;

impl<'de> serde::de::Visitor<'de> for MacAddrVisitor {
    type Value = MacAddr;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a MAC address string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse::<MacAddress>()
            .map(MacAddr)
            .map_err(|_| E::custom(format!("invalid MAC address: {}", v)))
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(MacAddrVisitor)
    }
}

impl Serialize for MacAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl FromStr for MacAddr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<MacAddress>().map(MacAddr).map_err(|_| {
            NetError::Config(ConfigError::InvalidValue {
                field: "mac_address".to_string(),
                value: s.to_string(),
            })
        })
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Complete interface state, keyed by name in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NetworkState {
    #[serde(default)]
    pub interfaces: IndexMap<String, Interface>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    pub fn insert(&mut self, iface: Interface) {
        self.interfaces.insert(iface.name.clone(), iface);
    }

    pub fn remove(&mut self, name: &str) -> Option<Interface> {
        self.interfaces.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Interfaces that name `target` as a dependency (bridge port, vlan parent)
    pub fn dependents_of(&self, target: &str) -> Vec<&Interface> {
        self.interfaces
            .values()
            .filter(|iface| iface.kind.dependencies().contains(&target))
            .collect()
    }
}
