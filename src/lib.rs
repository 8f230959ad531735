//! # vmess-relay
//!
//! A local tunneling agent. It takes a `vmess://` share link, decodes the
//! remote endpoint out of it, and relays raw TCP streams from a local
//! listener to that endpoint while the host keeps a virtual interface and a
//! foreground notification up.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Host Shell                        │
//! │      (UI, permission prompt, notification, TUN)      │
//! ├─────────────────────────────────────────────────────┤
//! │                  Service Bridge                      │
//! │        (start / stop / status, JSON requests)        │
//! ├─────────────────────────────────────────────────────┤
//! │                Lifecycle Manager                     │
//! │   (state machine, worker pool, interface handle)     │
//! ├─────────────────────────────────────────────────────┤
//! │                  Relay Layer                         │
//! │        (local listener, per-session copy pumps)      │
//! ├─────────────────────────────────────────────────────┤
//! │                 Transport Layer                      │
//! │               (plain TCP to the endpoint)            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! No proxy protocol is spoken: bytes from the local client reach the remote
//! endpoint unchanged.

pub mod config;
pub mod endpoint;
pub mod host;
pub mod interface;
pub mod proxy;
pub mod service;
pub mod transport;
pub mod tunnel;

pub use config::Config;
pub use endpoint::{parse, EndpointDescriptor};
pub use service::TunnelService;
pub use tunnel::{TunnelManager, TunnelState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] endpoint::ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Interface error: {0}")]
    Interface(#[from] interface::InterfaceError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
