//! Raw TCP dialer

use super::{Dialer, TransportConfig, TransportError};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

/// Plain TCP dialer with a connect timeout
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    config: TransportConfig,
}

impl TcpDialer {
    /// Create a new TCP dialer
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let target = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| TransportError::Timeout(target.clone()))?
            .map_err(|source| TransportError::Dial {
                target: target.clone(),
                source,
            })?;

        if self.config.nodelay {
            stream.set_nodelay(true).ok();
        }

        trace!("Dialed {}", target);
        Ok(stream)
    }
}
