//! Virtual network interface boundary
//!
//! The OS tunnel device (an Android `VpnService`, a Linux TUN, ...) is owned
//! by the host. The manager only asks a [`VirtualInterface`] backend to
//! establish one with a fixed [`InterfaceConfig`] and to tear it down again.
//! Packets are never read from the device here.

mod detached;

pub use detached::DetachedInterface;

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Smallest MTU accepted for the device (IPv4 minimum reassembly size)
pub const MIN_MTU: u16 = 576;

/// Interface errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceError {
    #[error("Failed to establish interface: {0}")]
    Establish(String),

    #[error("Invalid interface configuration: {0}")]
    InvalidConfig(String),

    #[error("An interface is already established")]
    AlreadyEstablished,

    #[error("Tunnel permission not granted")]
    PermissionDenied,
}

/// Settings applied to the tunnel device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Device MTU
    pub mtu: u16,
    /// Point-to-point address of the device
    pub address: Ipv4Net,
    /// Routes sent through the device
    pub routes: Vec<IpNet>,
    /// DNS resolvers pushed to the device
    pub dns: Vec<IpAddr>,
    /// Session name shown by the host
    pub session: String,
    /// Applications excluded from the tunnel (the agent itself)
    pub disallowed_applications: Vec<String>,
    /// Abort start when the interface cannot be established
    pub required: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            mtu: 1500,
            address: Ipv4Net::from(Ipv4Addr::new(10, 0, 0, 2)),
            routes: default_route(),
            dns: vec![
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            ],
            session: "vmess-relay".to_string(),
            disallowed_applications: vec![env!("CARGO_PKG_NAME").to_string()],
            required: false,
        }
    }
}

/// Catch-all IPv4 route
fn default_route() -> Vec<IpNet> {
    Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0)
        .map(IpNet::V4)
        .into_iter()
        .collect()
}

impl InterfaceConfig {
    /// Check the settings before handing them to a backend
    pub fn validate(&self) -> Result<(), InterfaceError> {
        if self.mtu < MIN_MTU {
            return Err(InterfaceError::InvalidConfig(format!(
                "MTU {} is below {}",
                self.mtu, MIN_MTU
            )));
        }
        if self.routes.is_empty() {
            return Err(InterfaceError::InvalidConfig(
                "at least one route is required".to_string(),
            ));
        }
        if self.session.trim().is_empty() {
            return Err(InterfaceError::InvalidConfig(
                "session name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opaque handle to an established interface
#[derive(Debug, PartialEq, Eq)]
pub struct InterfaceHandle {
    id: u64,
    name: String,
}

impl InterfaceHandle {
    /// Backends mint handles; `id` must be unique per backend
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Host facility that creates the tunnel device
pub trait VirtualInterface: Send + Sync {
    /// Create the device. At most one handle may be live at a time.
    fn establish(&self, config: &InterfaceConfig) -> Result<InterfaceHandle, InterfaceError>;

    /// Destroy a device created by [`establish`](Self::establish)
    fn teardown(&self, handle: InterfaceHandle);
}
