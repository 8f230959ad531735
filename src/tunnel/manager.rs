//! Tunnel lifecycle manager
//!
//! ```text
//! Stopped --start--> Starting --bound--> Running --stop--> Stopping --> Stopped
//!                        |
//!                        +--error--> Stopped
//! ```
//!
//! Start and stop serialise on one mutex around the active tunnel; status
//! reads go through an atomic and never wait on a transition.

use super::pool::{TaskDone, WorkerPool};
use super::{TunnelError, TunnelState};
use crate::config::Config;
use crate::endpoint::{self, EndpointDescriptor};
use crate::host::{HostCapabilities, Permission};
use crate::interface::{InterfaceError, InterfaceHandle};
use crate::proxy::{relay, RelayListener, SessionStats, StatsSnapshot};
use crate::transport::{Dialer, TcpDialer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long teardown waits for the accept loop to release the listening socket
const LISTENER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a successful [`TunnelManager::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The tunnel came up on `local_addr`
    Started {
        local_addr: SocketAddr,
        endpoint: EndpointDescriptor,
    },
    /// A tunnel was already running; nothing changed
    AlreadyRunning {
        local_addr: SocketAddr,
        endpoint: EndpointDescriptor,
    },
}

impl StartOutcome {
    pub fn local_addr(&self) -> SocketAddr {
        match self {
            StartOutcome::Started { local_addr, .. }
            | StartOutcome::AlreadyRunning { local_addr, .. } => *local_addr,
        }
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        match self {
            StartOutcome::Started { endpoint, .. }
            | StartOutcome::AlreadyRunning { endpoint, .. } => endpoint,
        }
    }
}

/// Result of [`TunnelManager::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Nothing was running; no socket was touched
    AlreadyStopped,
}

/// Resources owned while the tunnel runs
struct ActiveTunnel {
    endpoint: Arc<EndpointDescriptor>,
    local_addr: SocketAddr,
    runtime: RelayRuntime,
    interface: Option<InterfaceHandle>,
}

/// Worker pool plus the accept loop that owns the listening socket
struct RelayRuntime {
    pool: WorkerPool,
    accept_loop: TaskDone,
}

impl RelayRuntime {
    /// Cancel every session and return once the listening socket is closed
    fn close(self) {
        let RelayRuntime { pool, accept_loop } = self;

        pool.cancel();
        if !accept_loop.wait(LISTENER_CLOSE_TIMEOUT) {
            warn!(
                "Accept loop still running after {:?}; the listen port may stay busy",
                LISTENER_CLOSE_TIMEOUT
            );
        }
        pool.shutdown();
    }
}

/// Owner of the relay listener, worker pool and virtual interface
pub struct TunnelManager {
    config: Config,
    host: HostCapabilities,
    dialer: Arc<dyn Dialer>,
    stats: Arc<SessionStats>,
    state: AtomicU8,
    active: Mutex<Option<ActiveTunnel>>,
}

impl TunnelManager {
    /// Create a stopped manager
    pub fn new(config: Config, host: HostCapabilities) -> Self {
        let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::new(config.relay.transport()));
        Self {
            config,
            host,
            dialer,
            stats: Arc::new(SessionStats::new()),
            state: AtomicU8::new(TunnelState::Stopped as u8),
            active: Mutex::new(None),
        }
    }

    /// Replace the outbound dialer
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bring the tunnel up for `uri`.
    ///
    /// A running tunnel is left alone and reported as
    /// [`StartOutcome::AlreadyRunning`]. Any failure leaves the manager
    /// stopped with nothing bound.
    pub fn start(&self, uri: &str) -> Result<StartOutcome, TunnelError> {
        let mut active = self.lock_active();

        if let Some(tunnel) = active.as_ref() {
            debug!("Start ignored, tunnel already running on {}", tunnel.local_addr);
            return Ok(StartOutcome::AlreadyRunning {
                local_addr: tunnel.local_addr,
                endpoint: (*tunnel.endpoint).clone(),
            });
        }

        let endpoint = endpoint::parse(uri).map_err(|e| {
            error!("Failed to parse share link: {}", e);
            TunnelError::from(e)
        })?;

        if self.host.permission.request() == Permission::Denied {
            warn!("Tunnel permission denied by host");
            return Err(TunnelError::PermissionDenied);
        }

        self.set_state(TunnelState::Starting);
        match self.bring_up(endpoint) {
            Ok(tunnel) => {
                let outcome = StartOutcome::Started {
                    local_addr: tunnel.local_addr,
                    endpoint: (*tunnel.endpoint).clone(),
                };
                info!(
                    "Tunnel running on {} -> {}",
                    tunnel.local_addr,
                    tunnel.endpoint.authority()
                );
                *active = Some(tunnel);
                self.set_state(TunnelState::Running);
                Ok(outcome)
            }
            Err(e) => {
                error!("Tunnel start failed: {}", e);
                self.set_state(TunnelState::Stopped);
                Err(e)
            }
        }
    }

    fn bring_up(&self, endpoint: EndpointDescriptor) -> Result<ActiveTunnel, TunnelError> {
        let listener = RelayListener::bind(&self.config.relay.listen)?;
        let local_addr = listener.local_addr();

        let pool = WorkerPool::new(self.config.relay.workers).map_err(TunnelError::Runtime)?;
        let endpoint = Arc::new(endpoint);
        let accept_loop = self.spawn_accept_loop(&pool, listener, Arc::clone(&endpoint));
        let runtime = RelayRuntime { pool, accept_loop };

        let interface = match self.host.interface.establish(&self.config.interface) {
            Ok(handle) => {
                info!("Virtual interface {} established", handle);
                Some(handle)
            }
            Err(e) if self.config.interface.required => {
                runtime.close();
                return Err(match e {
                    InterfaceError::PermissionDenied => TunnelError::PermissionDenied,
                    other => TunnelError::Interface(other),
                });
            }
            Err(e) => {
                warn!("Failed to establish virtual interface, relaying without it: {}", e);
                None
            }
        };

        self.host.notifier.present(&self.config.notification);

        Ok(ActiveTunnel {
            endpoint,
            local_addr,
            runtime,
            interface,
        })
    }

    fn spawn_accept_loop(
        &self,
        pool: &WorkerPool,
        listener: RelayListener,
        endpoint: Arc<EndpointDescriptor>,
    ) -> TaskDone {
        let sessions = pool.spawner();
        let cancel = pool.cancellation_token();
        let dialer = Arc::clone(&self.dialer);
        let stats = Arc::clone(&self.stats);

        pool.spawn_joinable(async move {
            let result = listener
                .run(cancel.clone(), move |stream, peer| {
                    let endpoint = Arc::clone(&endpoint);
                    let dialer = Arc::clone(&dialer);
                    let stats = Arc::clone(&stats);

                    sessions.spawn(async move {
                        if let Err(e) = relay(stream, &endpoint, dialer.as_ref(), &stats).await {
                            warn!("Relay for {} to {} failed: {}", peer, endpoint.authority(), e);
                        }
                    });
                })
                .await;

            match result {
                Ok(()) => debug!("Accept loop stopped"),
                Err(e) if cancel.is_cancelled() => {
                    debug!("Accept loop closed during shutdown: {}", e)
                }
                Err(e) => error!("Relay listener failed: {}", e),
            }
        })
    }

    /// Tear the tunnel down. Safe to call in any state.
    pub fn stop(&self) -> StopOutcome {
        let mut active = self.lock_active();

        let Some(tunnel) = active.take() else {
            debug!("Stop ignored, tunnel not running");
            return StopOutcome::AlreadyStopped;
        };

        self.set_state(TunnelState::Stopping);

        let ActiveTunnel {
            local_addr,
            runtime,
            interface,
            ..
        } = tunnel;

        // Sessions are dropped, not drained; the listening socket is closed
        // before the state leaves Stopping
        runtime.close();

        if let Some(handle) = interface {
            self.host.interface.teardown(handle);
        }

        self.set_state(TunnelState::Stopped);
        self.host.notifier.withdraw();

        info!("Tunnel on {} stopped", local_addr);
        StopOutcome::Stopped
    }

    /// The host revoked tunnel permission out of band
    pub fn revoke(&self) -> StopOutcome {
        warn!("Tunnel permission revoked by host");
        self.stop()
    }

    /// Whether the tunnel is running
    pub fn status(&self) -> bool {
        self.state() == TunnelState::Running
    }

    pub fn state(&self) -> TunnelState {
        TunnelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Address of the relay listener while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_active().as_ref().map(|t| t.local_addr)
    }

    /// Endpoint being relayed to while running
    pub fn endpoint(&self) -> Option<EndpointDescriptor> {
        self.lock_active().as_ref().map(|t| (*t.endpoint).clone())
    }

    /// Session counters since the manager was created
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn set_state(&self, state: TunnelState) {
        debug!("Tunnel state -> {}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTunnel>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("state", &self.state())
            .field("listen", &self.config.relay.listen)
            .finish_non_exhaustive()
    }
}
