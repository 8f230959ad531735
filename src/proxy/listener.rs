//! Relay listener: the local socket clients connect to

use super::ProxyError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Pause after an accept error that is not tied to one connection
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// A bound local socket waiting for its accept loop.
///
/// Binding happens synchronously, outside any runtime, so the caller learns
/// about an occupied port before anything is spawned.
#[derive(Debug)]
pub struct RelayListener {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
}

impl RelayListener {
    /// Bind the local relay address
    pub fn bind(addr: &str) -> Result<Self, ProxyError> {
        let bind_err = |source: std::io::Error| ProxyError::Bind {
            addr: addr.to_string(),
            source,
        };

        let listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!("Relay listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `cancel` fires.
    ///
    /// `on_accept` must hand the stream off and return; it is called inline
    /// between accepts. Accept errors never end the loop: a failed handshake
    /// is skipped, anything else (descriptor exhaustion, ...) is logged and
    /// retried after a pause. The socket is closed when this returns.
    pub async fn run<F>(self, cancel: CancellationToken, mut on_accept: F) -> Result<(), ProxyError>
    where
        F: FnMut(TcpStream, SocketAddr),
    {
        let listener = TcpListener::from_std(self.listener)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Accept loop on {} cancelled", self.local_addr);
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!("New relay connection from {}", peer_addr);
                        stream.set_nodelay(true).ok();
                        on_accept(stream, peer_addr);
                    }
                    Err(e) if is_connection_error(&e) => {
                        debug!(error = %e, "Non-fatal accept error on {}", self.local_addr);
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            "Accept failed on {}, retrying in {:?}",
                            self.local_addr, ACCEPT_BACKOFF
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!("Accept loop on {} cancelled", self.local_addr);
                                return Ok(());
                            }
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                },
            }
        }
    }
}

/// Errors that concern only the connection being accepted
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
