//! Capabilities the host environment lends to the tunnel
//!
//! The manager never talks to a UI. It asks a [`PermissionGate`] before
//! bringing the tunnel up, tells a [`Notifier`] when the tunnel enters or
//! leaves the running state, and hands interface work to a
//! [`VirtualInterface`] backend.

use crate::interface::{DetachedInterface, VirtualInterface};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Outcome of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Interactive (or policy) grant for creating the tunnel device
pub trait PermissionGate: Send + Sync {
    fn request(&self) -> Permission;
}

/// Grants every request. This is the explicit bypass for hosts that need no
/// prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoGrant;

impl PermissionGate for AutoGrant {
    fn request(&self) -> Permission {
        Permission::Granted
    }
}

/// Ongoing foreground notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    pub title: String,
    pub text: String,
    /// Cannot be dismissed while the tunnel runs
    #[serde(skip)]
    pub ongoing: bool,
}

impl Default for Notification {
    fn default() -> Self {
        Self {
            title: "vmess-relay".to_string(),
            text: "Status: Connected via local relay".to_string(),
            ongoing: true,
        }
    }
}

/// Presents the foreground notification
pub trait Notifier: Send + Sync {
    fn present(&self, notification: &Notification);
    fn withdraw(&self);
}

/// Notifier for headless hosts: writes the notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn present(&self, notification: &Notification) {
        info!(
            ongoing = notification.ongoing,
            "{}: {}", notification.title, notification.text
        );
    }

    fn withdraw(&self) {
        info!("Notification withdrawn");
    }
}

/// Everything the manager borrows from the host
#[derive(Clone)]
pub struct HostCapabilities {
    pub interface: Arc<dyn VirtualInterface>,
    pub notifier: Arc<dyn Notifier>,
    pub permission: Arc<dyn PermissionGate>,
}

impl HostCapabilities {
    pub fn new(
        interface: Arc<dyn VirtualInterface>,
        notifier: Arc<dyn Notifier>,
        permission: Arc<dyn PermissionGate>,
    ) -> Self {
        Self {
            interface,
            notifier,
            permission,
        }
    }

    pub fn with_interface(mut self, interface: Arc<dyn VirtualInterface>) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_permission(mut self, permission: Arc<dyn PermissionGate>) -> Self {
        self.permission = permission;
        self
    }
}

impl Default for HostCapabilities {
    /// Detached interface, log notifications, no permission prompt
    fn default() -> Self {
        Self {
            interface: Arc::new(DetachedInterface::new()),
            notifier: Arc::new(TracingNotifier),
            permission: Arc::new(AutoGrant),
        }
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities").finish_non_exhaustive()
    }
}
