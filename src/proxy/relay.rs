//! Stream relay: one local client paired with one dialed remote

use super::SessionStats;
use crate::endpoint::EndpointDescriptor;
use crate::transport::{Dialer, TransportError};
use bytes::BytesMut;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Read buffer size for each copy pump
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Copy direction within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local client to remote endpoint
    Upstream,
    /// Remote endpoint to local client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client->remote"),
            Direction::Downstream => f.write_str("remote->client"),
        }
    }
}

/// Relay one accepted client to the endpoint.
///
/// Returns once either direction hits EOF or an error; both streams are shut
/// down by then. A dial failure closes the client and is returned so the
/// caller can log it. Nothing here is retried.
pub async fn relay(
    mut client: TcpStream,
    endpoint: &EndpointDescriptor,
    dialer: &dyn Dialer,
    stats: &SessionStats,
) -> Result<(), TransportError> {
    let _session = stats.open_session();
    let peer = client
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let mut remote = match dialer.dial(&endpoint.host, endpoint.port).await {
        Ok(remote) => remote,
        Err(e) => {
            stats.record_dial_failure();
            close_quietly(&mut client, "client").await;
            return Err(e);
        }
    };
    debug!("Relaying {} to {}", peer, endpoint.authority());

    let (ended, result) = {
        let (mut client_read, mut client_write) = client.split();
        let (mut remote_read, mut remote_write) = remote.split();

        tokio::select! {
            r = pump(&mut client_read, &mut remote_write, Direction::Upstream, stats) => {
                (Direction::Upstream, r)
            }
            r = pump(&mut remote_read, &mut client_write, Direction::Downstream, stats) => {
                (Direction::Downstream, r)
            }
        }
    };

    match result {
        Ok(n) => debug!("Session {} ended: {} reached EOF after {} bytes", peer, ended, n),
        Err(e) => debug!("Session {} ended: {} failed: {}", peer, ended, e),
    }

    // Either side finishing ends the whole session
    close_quietly(&mut client, "client").await;
    close_quietly(&mut remote, "remote").await;
    Ok(())
}

/// Copy `reader` into `writer` until EOF, flushing after every read
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: Direction,
    stats: &SessionStats,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(RELAY_BUFFER_SIZE);
    let mut total = 0u64;

    loop {
        buf.clear();
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;

        total += n as u64;
        stats.add_bytes(direction, n);
        trace!("{}: {} bytes", direction, n);
    }
}

async fn close_quietly(stream: &mut TcpStream, side: &str) {
    if let Err(e) = stream.shutdown().await {
        match e.kind() {
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                trace!("Closing {} stream: {}", side, e)
            }
            _ => warn!("Closing {} stream failed: {}", side, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Scheme, TransportHints};
    use crate::transport::TcpDialer;
    use tokio::net::TcpListener;

    fn endpoint_for(port: u16) -> EndpointDescriptor {
        EndpointDescriptor {
            scheme: Scheme::Vmess,
            host: "127.0.0.1".to_string(),
            port,
            identifier: "test".to_string(),
            hints: TransportHints::default(),
            raw: String::new(),
        }
    }

    /// Accepts one client on a fresh local listener and relays it
    async fn relayed_client(
        endpoint: EndpointDescriptor,
    ) -> (TcpStream, tokio::task::JoinHandle<(Result<(), TransportError>, SessionStats)>) {
        let local = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = local.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let (client, _) = local.accept().await.unwrap();
            let stats = SessionStats::new();
            let result = relay(client, &endpoint, &TcpDialer::default(), &stats).await;
            (result, stats)
        });

        (TcpStream::connect(local_addr).await.unwrap(), task)
    }

    #[tokio::test]
    async fn test_relay_copies_both_directions() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_port = remote.local_addr().unwrap().port();

        let remote_task = tokio::spawn(async move {
            let (mut socket, _) = remote.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"world").await.unwrap();
            buf
        });

        let (mut client, relay_task) = relayed_client(endpoint_for(remote_port)).await;
        client.write_all(b"hello").await.unwrap();

        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"world");
        assert_eq!(&remote_task.await.unwrap(), b"hello");

        // Remote hung up after replying, so the client sees EOF too
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let (result, stats) = relay_task.await.unwrap();
        result.unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_upstream, 5);
        assert_eq!(snap.bytes_downstream, 5);
        assert_eq!(snap.active, 0);
    }

    #[tokio::test]
    async fn test_client_eof_closes_remote() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_port = remote.local_addr().unwrap().port();

        let remote_task = tokio::spawn(async move {
            let (mut socket, _) = remote.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let (mut client, relay_task) = relayed_client(endpoint_for(remote_port)).await;
        client.write_all(&[7, 8, 9]).await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(remote_task.await.unwrap(), vec![7, 8, 9]);
        relay_task.await.unwrap().0.unwrap();
    }

    #[tokio::test]
    async fn test_dial_failure_closes_client() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = unused.local_addr().unwrap().port();
        drop(unused);

        let (mut client, relay_task) = relayed_client(endpoint_for(dead_port)).await;

        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        let (result, stats) = relay_task.await.unwrap();
        assert!(matches!(result, Err(TransportError::Dial { .. })));
        assert_eq!(stats.snapshot().dial_failures, 1);
    }
}
