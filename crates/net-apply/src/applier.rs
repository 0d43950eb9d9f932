//! System applier backends
//!
//! `SystemApplier` is the seam between the transaction manager and the
//! operating system. `IpCommandApplier` drives ip(8); `MemoryApplier` is an
//! in-memory state machine for tests and demos, with fault injection to
//! exercise the rollback path.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;

use nettx_core::error::{ConfigError, SystemError};
use nettx_core::{
    AdminState, Interface, InterfaceKind, IpAddress, NetError, NetworkState, Result,
};

/// Interface lifecycle operations against the live system
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SystemApplier: Send + Sync {
    /// Snapshot the current interface state
    async fn current_state(&self) -> Result<NetworkState>;

    /// Create an interface with its full desired configuration
    async fn create_interface(&self, iface: &Interface) -> Result<()>;

    /// Delete an interface
    async fn delete_interface(&self, name: &str) -> Result<()>;

    /// Assign an address
    async fn add_address(&self, name: &str, address: &IpAddress) -> Result<()>;

    /// Remove an assigned address
    async fn remove_address(&self, name: &str, address: &IpAddress) -> Result<()>;

    /// Change administrative state
    async fn set_admin_state(&self, name: &str, state: AdminState) -> Result<()>;

    /// Change MTU
    async fn set_mtu(&self, name: &str, mtu: u16) -> Result<()>;
}

/// Captured result of an external command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Applier backend driving ip(8)
pub struct IpCommandApplier {
    /// Path to the ip command
    ip_path: String,
    /// Timeout per command
    operation_timeout: Duration,
}

impl IpCommandApplier {
    pub fn new() -> Self {
        Self {
            ip_path: "/sbin/ip".to_string(),
            operation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_config(ip_path: String, operation_timeout: Duration) -> Self {
        Self {
            ip_path,
            operation_timeout,
        }
    }

    /// Execute `ip` with the given arguments, capturing output
    async fn execute(&self, args: &[&str]) -> Result<CommandResult> {
        let start = std::time::Instant::now();
        let command_line = format!("{} {}", self.ip_path, args.join(" "));
        debug!("executing: {}", command_line);

        let mut cmd = Command::new(&self.ip_path);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

        match timeout(self.operation_timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let result = CommandResult {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                if !result.success {
                    warn!(
                        "{} failed with exit code {:?}: {}",
                        command_line, result.exit_code, result.stderr
                    );
                }
                Ok(result)
            }
            Ok(Err(e)) => Err(NetError::System(SystemError::CommandFailed {
                command: command_line,
                stderr: e.to_string(),
            })),
            Err(_) => Err(NetError::System(SystemError::Timeout {
                command: command_line,
            })),
        }
    }

    /// Execute and map a non-zero exit to an error
    async fn run(&self, args: &[&str]) -> Result<CommandResult> {
        let result = self.execute(args).await?;
        if !result.success {
            return Err(NetError::System(SystemError::CommandFailed {
                command: format!("{} {}", self.ip_path, args.join(" ")),
                stderr: result.stderr,
            }));
        }
        Ok(result)
    }

    /// Parse one entry of `ip -j addr show` output
    fn parse_entry(&self, entry: &serde_json::Value) -> Option<Interface> {
        let name = entry.get("ifname")?.as_str()?.to_string();

        let flags: Vec<String> = entry
            .get("flags")
            .and_then(|f| f.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        // Administrative state is the IFF_UP flag, not operstate
        let admin_state = if flags.iter().any(|f| f == "UP") {
            AdminState::Up
        } else {
            AdminState::Down
        };

        let info_kind = entry
            .get("linkinfo")
            .and_then(|li| li.get("info_kind"))
            .and_then(|k| k.as_str());

        let kind = match info_kind {
            Some("dummy") => InterfaceKind::Dummy,
            Some("bridge") => InterfaceKind::Bridge { ports: Vec::new() },
            Some("vlan") => {
                let parent = entry
                    .get("link")
                    .and_then(|l| l.as_str())
                    .unwrap_or_default()
                    .to_string();
                let tag = entry
                    .get("linkinfo")
                    .and_then(|li| li.get("info_data"))
                    .and_then(|d| d.get("id"))
                    .and_then(|id| id.as_u64())
                    .unwrap_or(0) as u16;
                InterfaceKind::Vlan { parent, tag }
            }
            _ if entry.get("link_type").and_then(|t| t.as_str()) == Some("loopback") => {
                InterfaceKind::Loopback
            }
            _ => InterfaceKind::Physical,
        };

        let mut addresses = Vec::new();
        if let Some(addr_info) = entry.get("addr_info").and_then(|a| a.as_array()) {
            for info in addr_info {
                let local = info.get("local").and_then(|l| l.as_str());
                let prefix = info.get("prefixlen").and_then(|p| p.as_u64());
                if let (Some(local), Some(prefix)) = (local, prefix) {
                    match local.parse() {
                        Ok(addr) => addresses.push(IpAddress::new(addr, Some(prefix as u8))),
                        Err(_) => warn!("skipping unparsable address {} on {}", local, name),
                    }
                }
            }
        }

        let mac = entry
            .get("address")
            .and_then(|a| a.as_str())
            .and_then(|a| a.parse().ok());

        let mtu = entry
            .get("mtu")
            .and_then(|m| m.as_u64())
            .map(|m| m.min(u16::MAX as u64) as u16);

        Some(Interface {
            name,
            kind,
            addresses,
            mac,
            mtu,
            admin_state,
            options: Default::default(),
        })
    }
}

impl Default for IpCommandApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemApplier for IpCommandApplier {
    async fn current_state(&self) -> Result<NetworkState> {
        let result = self.run(&["-j", "addr", "show"]).await?;
        let parsed: serde_json::Value = serde_json::from_str(&result.stdout)?;

        let mut state = NetworkState::new();
        if let Some(entries) = parsed.as_array() {
            for entry in entries {
                if let Some(iface) = self.parse_entry(entry) {
                    state.insert(iface);
                }
            }
        }
        Ok(state)
    }

    async fn create_interface(&self, iface: &Interface) -> Result<()> {
        let mtu_str;
        let mac_str;
        let tag_str;

        let mut args: Vec<&str> = vec!["link", "add"];
        match &iface.kind {
            InterfaceKind::Vlan { parent, tag } => {
                tag_str = tag.to_string();
                args.extend(["link", parent.as_str(), "name", iface.name.as_str()]);
                if let Some(mtu) = iface.mtu {
                    mtu_str = mtu.to_string();
                    args.extend(["mtu", mtu_str.as_str()]);
                }
                args.extend(["type", "vlan", "id", tag_str.as_str()]);
            }
            InterfaceKind::Dummy | InterfaceKind::Bridge { .. } => {
                args.push(iface.name.as_str());
                if let Some(mtu) = iface.mtu {
                    mtu_str = mtu.to_string();
                    args.extend(["mtu", mtu_str.as_str()]);
                }
                if let Some(mac) = &iface.mac {
                    mac_str = mac.to_string();
                    args.extend(["address", mac_str.as_str()]);
                }
                args.extend(["type", iface.kind.kind_name()]);
            }
            other => {
                return Err(NetError::System(SystemError::InterfaceOperation {
                    interface: iface.name.clone(),
                    operation: format!("create {} interface", other.kind_name()),
                }));
            }
        }
        self.run(&args).await?;

        if let InterfaceKind::Bridge { ports } = &iface.kind {
            for port in ports {
                self.run(&["link", "set", port, "master", &iface.name])
                    .await?;
            }
        }

        for address in &iface.addresses {
            self.add_address(&iface.name, address).await?;
        }

        if iface.admin_state.is_up() {
            self.set_admin_state(&iface.name, AdminState::Up).await?;
        }

        Ok(())
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        self.run(&["link", "del", name]).await?;
        Ok(())
    }

    async fn add_address(&self, name: &str, address: &IpAddress) -> Result<()> {
        let cidr = address.to_string();
        self.run(&["addr", "add", &cidr, "dev", name]).await?;
        Ok(())
    }

    async fn remove_address(&self, name: &str, address: &IpAddress) -> Result<()> {
        let cidr = address.to_string();
        self.run(&["addr", "del", &cidr, "dev", name]).await?;
        Ok(())
    }

    async fn set_admin_state(&self, name: &str, state: AdminState) -> Result<()> {
        self.run(&["link", "set", name, &state.to_string()]).await?;
        Ok(())
    }

    async fn set_mtu(&self, name: &str, mtu: u16) -> Result<()> {
        let mtu = mtu.to_string();
        self.run(&["link", "set", name, "mtu", &mtu]).await?;
        Ok(())
    }
}

/// Injected failure schedule for `MemoryApplier`
#[derive(Default)]
struct FaultPlan {
    /// Mutations attempted since the plan was armed
    attempts: u32,
    /// Attempt indices that fail; everything else succeeds
    failures: Vec<u32>,
}

/// In-memory applier used by tests and demos
pub struct MemoryApplier {
    state: Mutex<NetworkState>,
    fault: Mutex<FaultPlan>,
}

impl MemoryApplier {
    pub fn new() -> Self {
        Self::with_state(NetworkState::new())
    }

    pub fn with_state(state: NetworkState) -> Self {
        Self {
            state: Mutex::new(state),
            fault: Mutex::new(FaultPlan::default()),
        }
    }

    /// Let the next `mutations` mutations succeed, then fail once
    pub async fn fail_after(&self, mutations: u32) {
        self.fail_at(&[mutations]).await;
    }

    /// Fail the mutations at the given attempt indices, counted from the
    /// next mutation. Scheduling a failure inside the revert path lets a
    /// rollback itself break down.
    pub async fn fail_at(&self, mutations: &[u32]) {
        let mut plan = self.fault.lock().await;
        plan.attempts = 0;
        plan.failures = mutations.to_vec();
    }

    async fn check_fault(&self, interface: &str, operation: &str) -> Result<()> {
        let mut plan = self.fault.lock().await;
        let attempt = plan.attempts;
        plan.attempts += 1;
        if plan.failures.contains(&attempt) {
            Err(NetError::System(SystemError::InterfaceOperation {
                interface: interface.to_string(),
                operation: format!("{} (injected fault)", operation),
            }))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemApplier for MemoryApplier {
    async fn current_state(&self) -> Result<NetworkState> {
        Ok(self.state.lock().await.clone())
    }

    async fn create_interface(&self, iface: &Interface) -> Result<()> {
        self.check_fault(&iface.name, "create").await?;
        let mut state = self.state.lock().await;
        if state.contains(&iface.name) {
            return Err(NetError::Config(ConfigError::DuplicateInterface {
                name: iface.name.clone(),
            }));
        }
        state.insert(iface.clone());
        Ok(())
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        self.check_fault(name, "delete").await?;
        let mut state = self.state.lock().await;
        state.remove(name).ok_or_else(|| {
            NetError::Config(ConfigError::UnknownInterface {
                name: name.to_string(),
            })
        })?;
        Ok(())
    }

    async fn add_address(&self, name: &str, address: &IpAddress) -> Result<()> {
        self.check_fault(name, "add address").await?;
        let mut state = self.state.lock().await;
        let iface = state.interfaces.get_mut(name).ok_or_else(|| {
            NetError::Config(ConfigError::UnknownInterface {
                name: name.to_string(),
            })
        })?;
        if !iface.has_address(address) {
            iface.addresses.push(address.clone());
        }
        Ok(())
    }

    async fn remove_address(&self, name: &str, address: &IpAddress) -> Result<()> {
        self.check_fault(name, "remove address").await?;
        let mut state = self.state.lock().await;
        let iface = state.interfaces.get_mut(name).ok_or_else(|| {
            NetError::Config(ConfigError::UnknownInterface {
                name: name.to_string(),
            })
        })?;
        iface.addresses.retain(|a| a.addr != address.addr);
        Ok(())
    }

    async fn set_admin_state(&self, name: &str, admin_state: AdminState) -> Result<()> {
        self.check_fault(name, "set admin state").await?;
        let mut state = self.state.lock().await;
        let iface = state.interfaces.get_mut(name).ok_or_else(|| {
            NetError::Config(ConfigError::UnknownInterface {
                name: name.to_string(),
            })
        })?;
        iface.admin_state = admin_state;
        Ok(())
    }

    async fn set_mtu(&self, name: &str, mtu: u16) -> Result<()> {
        self.check_fault(name, "set mtu").await?;
        let mut state = self.state.lock().await;
        let iface = state.interfaces.get_mut(name).ok_or_else(|| {
            NetError::Config(ConfigError::UnknownInterface {
                name: name.to_string(),
            })
        })?;
        iface.mtu = Some(mtu);
        Ok(())
    }
}
