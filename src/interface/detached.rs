//! Interface backend used when no OS tunnel facility is wired in.
//!
//! It validates and logs the settings a real device would receive and keeps
//! the one-live-handle rule, but creates nothing. The relay stays usable as
//! a plain local forwarder.

use super::{InterfaceConfig, InterfaceError, InterfaceHandle, VirtualInterface};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct DetachedInterface {
    next_id: AtomicU64,
    live: Mutex<Option<u64>>,
}

impl DetachedInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handle is currently established
    pub fn is_established(&self) -> bool {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl VirtualInterface for DetachedInterface {
    fn establish(&self, config: &InterfaceConfig) -> Result<InterfaceHandle, InterfaceError> {
        config.validate()?;

        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.is_some() {
            return Err(InterfaceError::AlreadyEstablished);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        *live = Some(id);

        info!(
            session = %config.session,
            mtu = config.mtu,
            address = %config.address,
            routes = ?config.routes,
            dns = ?config.dns,
            excluded = ?config.disallowed_applications,
            "Virtual interface configured (detached, no device created)"
        );
        Ok(InterfaceHandle::new(id, config.session.clone()))
    }

    fn teardown(&self, handle: InterfaceHandle) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if *live == Some(handle.id()) {
            *live = None;
            info!("Virtual interface {} torn down", handle);
        } else {
            warn!("Teardown of unknown interface handle {}", handle);
        }
    }
}
