//! Endpoint descriptors decoded from share links
//!
//! A share link is an opaque URI such as `vmess://<base64 json>`. Decoding it
//! yields an [`EndpointDescriptor`]: the remote host, port and credential the
//! relay dials. Parsing is pure and never panics on hostile input.

mod vmess;

pub use vmess::VmessRecord;

use std::fmt;
use thiserror::Error;

/// Port substituted when the share link carries no usable port
pub const DEFAULT_REMOTE_PORT: u16 = 443;

/// Share-link parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed share link: {0}")]
    Malformed(String),
}

/// Share-link schemes understood by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Vmess,
}

impl Scheme {
    /// URI prefix, including the `://` separator
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Vmess => "vmess://",
        }
    }

    /// Short name as written in the URI
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Vmess => "vmess",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary transport metadata carried by the share link.
///
/// None of it is interpreted: the relay speaks plain TCP to the remote
/// endpoint. It is kept so callers can display or forward it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHints {
    /// Share-link format version (`v`)
    pub version: Option<String>,
    /// Human-readable label (`ps`)
    pub label: Option<String>,
    /// Alter id (`aid`)
    pub alter_id: Option<String>,
    /// Network kind, e.g. `tcp` or `ws` (`net`)
    pub network: Option<String>,
    /// Header obfuscation type (`type`)
    pub header_type: Option<String>,
    /// Host header / SNI hint
    pub host: Option<String>,
    /// Path hint for ws/h2 transports
    pub path: Option<String>,
    /// TLS hint, usually `tls` or empty
    pub tls: Option<String>,
}

/// Remote endpoint decoded from a share link
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Opaque credential (the vmess user id)
    pub identifier: String,
    pub hints: TransportHints,
    /// The URI this descriptor was decoded from
    pub raw: String,
}

impl EndpointDescriptor {
    /// `host:port`, with IPv6 literals bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Credential with everything but the first 8 characters masked
    pub fn masked_identifier(&self) -> String {
        let visible: String = self.identifier.chars().take(8).collect();
        if visible.len() < self.identifier.len() {
            format!("{}...", visible)
        } else {
            visible
        }
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("identifier", &self.masked_identifier())
            .field("hints", &self.hints)
            .finish()
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.scheme.prefix(), self.authority())
    }
}

/// Parse a share link into an endpoint descriptor.
///
/// The input must start with the scheme prefix; leading whitespace is not
/// skipped. Whitespace inside or after the payload is ignored.
pub fn parse(uri: &str) -> Result<EndpointDescriptor, ParseError> {
    if let Some(payload) = uri.strip_prefix(Scheme::Vmess.prefix()) {
        return vmess::decode(payload)?.into_descriptor(uri.trim_end());
    }

    let scheme = match uri.find("://") {
        Some(idx) => &uri[..idx],
        None => uri,
    };
    Err(ParseError::UnsupportedScheme(scheme.trim().to_string()))
}

impl std::str::FromStr for EndpointDescriptor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}
