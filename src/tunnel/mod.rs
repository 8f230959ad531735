//! Tunnel lifecycle
//!
//! Provides:
//! - The lifecycle manager (start / stop / status state machine)
//! - The bounded worker pool that runs the relay
//! - Lifecycle errors and their host-facing codes

mod manager;
mod pool;

pub use manager::{StartOutcome, StopOutcome, TunnelManager};
pub use pool::{PoolSpawner, TaskDone, WorkerPool};

use crate::endpoint::ParseError;
use crate::interface::InterfaceError;
use crate::proxy::ProxyError;
use std::fmt;
use thiserror::Error;

/// Lifecycle errors surfaced by [`TunnelManager::start`]
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid configuration link: {0}")]
    Parse(#[from] ParseError),

    #[error("Tunnel permission denied")]
    PermissionDenied,

    #[error("Relay listener error: {0}")]
    Bind(#[from] ProxyError),

    #[error("Virtual interface error: {0}")]
    Interface(#[from] InterfaceError),

    #[error("Failed to start worker pool: {0}")]
    Runtime(#[source] std::io::Error),
}

impl TunnelError {
    /// Stable code reported to the host
    pub fn code(&self) -> &'static str {
        match self {
            TunnelError::Parse(_) => "CONFIG_ERROR",
            TunnelError::PermissionDenied => "VPN_PERMISSION_DENIED",
            TunnelError::Bind(_) => "BIND_ERROR",
            TunnelError::Interface(_) => "INTERFACE_ERROR",
            TunnelError::Runtime(_) => "RUNTIME_ERROR",
        }
    }

    /// The share link or settings are at fault, not the host
    pub fn is_configuration(&self) -> bool {
        matches!(self, TunnelError::Parse(_))
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, TunnelError::PermissionDenied)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TunnelState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl TunnelState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => TunnelState::Starting,
            2 => TunnelState::Running,
            3 => TunnelState::Stopping,
            _ => TunnelState::Stopped,
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Stopped => "stopped",
            TunnelState::Starting => "starting",
            TunnelState::Running => "running",
            TunnelState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
