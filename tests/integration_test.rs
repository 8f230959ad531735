//! Integration tests for the tunnel manager
//!
//! Drives the full path over loopback sockets:
//! - local client -> relay listener -> remote test server and back
//! - dial failures isolated to one session
//! - forced shutdown with sessions in flight
//! - idempotent start/stop and host capability calls

use base64::Engine;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use vmess_relay::config::Config;
use vmess_relay::host::{HostCapabilities, Notification, Notifier};
use vmess_relay::interface::{InterfaceConfig, InterfaceError, InterfaceHandle, VirtualInterface};
use vmess_relay::tunnel::{StartOutcome, StopOutcome, TunnelError, TunnelManager, TunnelState};
use vmess_relay::TunnelService;

/// Interface backend that counts calls and can be told to fail
#[derive(Default)]
struct RecordingInterface {
    establishes: AtomicUsize,
    teardowns: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    fail: bool,
}

impl VirtualInterface for RecordingInterface {
    fn establish(&self, _config: &InterfaceConfig) -> Result<InterfaceHandle, InterfaceError> {
        let n = self.establishes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(InterfaceError::Establish("no tun device".to_string()));
        }
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(InterfaceHandle::new(n as u64, "test"))
    }

    fn teardown(&self, _handle: InterfaceHandle) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Notifier that records presents and withdraws in order
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn present(&self, notification: &Notification) {
        assert!(notification.ongoing);
        self.events
            .lock()
            .unwrap()
            .push(format!("present:{}", notification.title));
    }

    fn withdraw(&self) {
        self.events.lock().unwrap().push("withdraw".to_string());
    }
}

struct Harness {
    manager: TunnelManager,
    interface: Arc<RecordingInterface>,
    notifier: Arc<RecordingNotifier>,
}

fn harness_with(config: Config, interface: RecordingInterface) -> Harness {
    let interface = Arc::new(interface);
    let notifier = Arc::new(RecordingNotifier::default());
    let host = HostCapabilities::default()
        .with_interface(interface.clone())
        .with_notifier(notifier.clone());

    Harness {
        manager: TunnelManager::new(config, host),
        interface,
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(test_config(), RecordingInterface::default())
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.relay.listen = "127.0.0.1:0".to_string();
    config.relay.connect_timeout_secs = 5;
    config.notification.title = "Test Relay".to_string();
    config
}

fn share_link(remote: SocketAddr) -> String {
    let json = format!(
        r#"{{"v":"2","ps":"test","add":"{}","port":"{}","id":"3f2b6d1e-0000-4000-8000-000000000001","aid":"0","net":"tcp","type":"none","host":"","path":"","tls":""}}"#,
        remote.ip(),
        remote.port()
    );
    format!(
        "vmess://{}",
        base64::engine::general_purpose::STANDARD.encode(json)
    )
}

/// A loopback port that was free a moment ago
fn reserved_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// An address nothing listens on
async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Read until EOF or error; true if the socket closed within `limit`
async fn closes_within(stream: &mut TcpStream, limit: Duration) -> bool {
    let mut buf = [0u8; 4096];
    tokio::time::timeout(limit, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await
    .is_ok()
}

fn local_addr(outcome: &StartOutcome) -> SocketAddr {
    outcome.local_addr()
}

/// Client bytes reach the remote in order and the reply comes back
#[tokio::test(flavor = "multi_thread")]
async fn test_bytes_relayed_both_ways() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote.local_addr().unwrap();

    let remote_task = tokio::spawn(async move {
        let (mut socket, _) = remote.accept().await.unwrap();
        let mut buf = [0u8; 3];
        socket.read_exact(&mut buf).await.unwrap();
        socket.write_all(&[0xAA, 0xBB]).await.unwrap();
        // Hold the socket until the client has read the reply
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest).await;
        buf
    });

    let h = harness();
    let outcome = h.manager.start(&share_link(remote_addr)).unwrap();
    assert!(h.manager.status());

    let mut client = TcpStream::connect(local_addr(&outcome)).await.unwrap();
    client.write_all(&[0x01, 0x02, 0x03]).await.unwrap();

    let mut reply = [0u8; 2];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut reply))
        .await
        .expect("reply timed out")
        .unwrap();
    assert_eq!(reply, [0xAA, 0xBB]);

    drop(client);
    let seen = tokio::time::timeout(Duration::from_secs(5), remote_task)
        .await
        .expect("remote did not finish")
        .unwrap();
    assert_eq!(seen, [0x01, 0x02, 0x03]);

    let stats = h.manager.stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.bytes_upstream, 3);
    assert_eq!(stats.bytes_downstream, 2);
}

/// A refused dial closes that client only; the tunnel keeps running
#[tokio::test(flavor = "multi_thread")]
async fn test_refused_remote_drops_only_that_session() {
    let h = harness();
    let outcome = h.manager.start(&share_link(dead_addr().await)).unwrap();

    for _ in 0..2 {
        let mut client = TcpStream::connect(local_addr(&outcome)).await.unwrap();
        assert!(closes_within(&mut client, Duration::from_secs(5)).await);
        assert_eq!(h.manager.state(), TunnelState::Running);
    }

    assert_eq!(h.manager.stats().dial_failures, 2);
    assert!(h.manager.status());
}

/// Stop with sessions mid-transfer closes every client promptly
#[tokio::test(flavor = "multi_thread")]
async fn test_stop_closes_sessions_in_flight() {
    const SESSIONS: usize = 10;

    // Remote that streams to every connection until it goes away
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote.local_addr().unwrap();
    let remote_task = tokio::spawn(async move {
        loop {
            let (mut socket, _) = match remote.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let chunk = [0x5Au8; 512];
                while socket.write_all(&chunk).await.is_ok() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            });
        }
    });

    let h = harness();
    let outcome = h.manager.start(&share_link(remote_addr)).unwrap();

    let mut clients = Vec::new();
    for _ in 0..SESSIONS {
        let mut client = TcpStream::connect(local_addr(&outcome)).await.unwrap();
        client.write_all(b"GET").await.unwrap();
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("no data from remote")
            .unwrap();
        assert!(n > 0);
        clients.push(client);
    }
    assert_eq!(h.manager.stats().active, SESSIONS);

    assert_eq!(h.manager.stop(), StopOutcome::Stopped);
    assert!(!h.manager.status());
    assert_eq!(h.manager.state(), TunnelState::Stopped);

    for client in clients.iter_mut() {
        assert!(closes_within(client, Duration::from_secs(5)).await);
    }

    // Session guards drop with their tasks
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.manager.stats().active > 0 {
        assert!(tokio::time::Instant::now() < deadline, "sessions still active");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    remote_task.abort();
}

/// Second start is a no-op; bind and establish happen once
#[tokio::test]
async fn test_start_twice_establishes_once() {
    let h = harness();
    let link = share_link(dead_addr().await);

    let first = h.manager.start(&link).unwrap();
    let second = h.manager.start(&link).unwrap();

    assert!(matches!(first, StartOutcome::Started { .. }));
    assert!(matches!(second, StartOutcome::AlreadyRunning { .. }));
    assert_eq!(first.local_addr(), second.local_addr());
    assert_eq!(h.interface.establishes.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.events(), vec!["present:Test Relay"]);

    h.manager.stop();
    assert_eq!(h.interface.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.events(), vec!["present:Test Relay", "withdraw"]);
}

/// Stop from Stopped touches nothing
#[tokio::test]
async fn test_stop_when_stopped_is_noop() {
    let h = harness();

    assert_eq!(h.manager.stop(), StopOutcome::AlreadyStopped);
    assert_eq!(h.manager.stop(), StopOutcome::AlreadyStopped);
    assert!(!h.manager.status());
    assert_eq!(h.interface.teardowns.load(Ordering::SeqCst), 0);
    assert!(h.notifier.events().is_empty());
}

/// The tunnel can come back up after a stop
#[tokio::test]
async fn test_restart_after_stop() {
    let h = harness();
    let link = share_link(dead_addr().await);

    h.manager.start(&link).unwrap();
    h.manager.stop();
    let again = h.manager.start(&link).unwrap();

    assert!(matches!(again, StartOutcome::Started { .. }));
    assert!(h.manager.status());
    assert_eq!(h.interface.establishes.load(Ordering::SeqCst), 2);
}

/// The listen port is free again as soon as stop returns
#[tokio::test(flavor = "multi_thread")]
async fn test_restart_on_fixed_port() {
    let port = reserved_port();
    let mut config = test_config();
    config.relay.listen = port.to_string();

    let h = harness_with(config, RecordingInterface::default());
    let link = share_link(dead_addr().await);

    for round in 0..50 {
        let outcome = h
            .manager
            .start(&link)
            .unwrap_or_else(|e| panic!("start {} failed: {}", round, e));
        assert_eq!(outcome.local_addr(), port);
        assert_eq!(h.manager.stop(), StopOutcome::Stopped);

        // Nobody is listening any more
        assert!(TcpStream::connect(port).await.is_err(), "round {}", round);
    }
    assert_eq!(h.interface.establishes.load(Ordering::SeqCst), 50);
    assert_eq!(h.interface.teardowns.load(Ordering::SeqCst), 50);
}

/// A required interface that fails also releases the port
#[tokio::test]
async fn test_failed_start_releases_port() {
    let port = reserved_port();
    let mut config = test_config();
    config.relay.listen = port.to_string();
    config.interface.required = true;

    let h = harness_with(
        config,
        RecordingInterface {
            fail: true,
            ..Default::default()
        },
    );
    assert!(h.manager.start(&share_link(dead_addr().await)).is_err());

    let rebound = std::net::TcpListener::bind(port);
    assert!(rebound.is_ok(), "port still held after failed start");
}

/// Concurrent start/stop never binds or establishes twice; status never blocks
#[test]
fn test_concurrent_start_stop_serialised() {
    use std::sync::atomic::AtomicBool;

    let port = reserved_port();
    let mut config = test_config();
    config.relay.listen = port.to_string();
    config.relay.workers = 1;

    let interface = Arc::new(RecordingInterface::default());
    let host = HostCapabilities::default().with_interface(interface.clone());
    let manager = Arc::new(TunnelManager::new(config, host));
    let link = share_link("127.0.0.1:9".parse().unwrap());
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut reads = 0u64;
            while !done.load(Ordering::SeqCst) {
                let _ = manager.status();
                let _ = manager.state();
                reads += 1;
            }
            reads
        });

        let workers: Vec<_> = (0..4)
            .map(|t| {
                let manager = Arc::clone(&manager);
                let link = link.clone();
                scope.spawn(move || {
                    for i in 0..25 {
                        if (i + t) % 2 == 0 {
                            if let Err(e) = manager.start(&link) {
                                panic!("thread {} start {} failed: {}", t, i, e);
                            }
                        } else {
                            manager.stop();
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);
    });

    manager.stop();
    assert_eq!(manager.state(), TunnelState::Stopped);
    assert!(interface.establishes.load(Ordering::SeqCst) > 0);
    assert_eq!(
        interface.establishes.load(Ordering::SeqCst),
        interface.teardowns.load(Ordering::SeqCst)
    );
    assert_eq!(interface.max_live.load(Ordering::SeqCst), 1);
    assert_eq!(interface.live.load(Ordering::SeqCst), 0);
}

/// Establish failure is tolerated unless the interface is required
#[tokio::test]
async fn test_interface_failure_policy() {
    let link = share_link(dead_addr().await);

    let lenient = harness_with(
        test_config(),
        RecordingInterface {
            fail: true,
            ..Default::default()
        },
    );
    lenient.manager.start(&link).unwrap();
    assert!(lenient.manager.status());
    lenient.manager.stop();
    // No handle was issued, so nothing to tear down
    assert_eq!(lenient.interface.teardowns.load(Ordering::SeqCst), 0);

    let mut config = test_config();
    config.interface.required = true;
    let strict = harness_with(
        config,
        RecordingInterface {
            fail: true,
            ..Default::default()
        },
    );
    let err = strict.manager.start(&link).unwrap_err();
    assert!(matches!(err, TunnelError::Interface(_)));
    assert_eq!(err.code(), "INTERFACE_ERROR");
    assert_eq!(strict.manager.state(), TunnelState::Stopped);
    assert!(strict.notifier.events().is_empty());
}

/// An occupied port fails the start and leaves the manager stopped
#[tokio::test]
async fn test_bind_conflict() {
    let squatter = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.relay.listen = squatter.local_addr().unwrap().to_string();

    let h = harness_with(config, RecordingInterface::default());
    let err = h.manager.start(&share_link(dead_addr().await)).unwrap_err();

    assert!(matches!(err, TunnelError::Bind(_)));
    assert_eq!(h.manager.state(), TunnelState::Stopped);
    assert_eq!(h.interface.establishes.load(Ordering::SeqCst), 0);
}

/// A bad link never gets as far as the host capabilities
#[tokio::test]
async fn test_parse_failure_touches_nothing() {
    let h = harness();

    let err = h.manager.start("vless://uuid@example.com:443").unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
    assert_eq!(h.interface.establishes.load(Ordering::SeqCst), 0);
    assert!(h.notifier.events().is_empty());
}

/// Revocation behaves like stop
#[tokio::test]
async fn test_revoke_tears_down() {
    let h = harness();
    h.manager.start(&share_link(dead_addr().await)).unwrap();

    assert_eq!(h.manager.revoke(), StopOutcome::Stopped);
    assert!(!h.manager.status());
    assert_eq!(h.interface.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.events().last().map(String::as_str), Some("withdraw"));
}

/// The JSON bridge drives the same lifecycle
#[tokio::test]
async fn test_service_json_round() {
    let manager = Arc::new(TunnelManager::new(test_config(), HostCapabilities::default()));
    let service = TunnelService::new(Arc::clone(&manager));

    let request = serde_json::json!({
        "method": "startVpnService",
        "args": { "configLink": share_link(dead_addr().await) }
    });
    let reply: serde_json::Value =
        serde_json::from_str(&service.handle_json(&request.to_string())).unwrap();
    assert_eq!(reply["status"], "success");

    let reply: serde_json::Value =
        serde_json::from_str(&service.handle_json(r#"{"method":"isVpnRunning"}"#)).unwrap();
    assert_eq!(reply["value"], true);

    let result = service.stop_tunnel();
    assert!(result.success);
    assert!(!service.query_status());
}
