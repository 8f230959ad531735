//! Outbound transport
//!
//! The relay reaches the remote endpoint through a [`Dialer`]. The only
//! implementation is plain TCP: no handshake bytes are written, the remote
//! sees exactly what the local client sends.

mod tcp;

pub use tcp::TcpDialer;

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out dialing {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Opens the remote half of a relay session
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `host:port`
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, TransportError>;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm on dialed streams
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            nodelay: true,
        }
    }
}
