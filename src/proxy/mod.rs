//! Local relay
//!
//! Provides:
//! - The relay listener: one local TCP socket and its accept loop
//! - The stream relay: a pair of copy pumps per accepted connection
//! - Session counters shared by both

mod listener;
mod relay;

pub use listener::RelayListener;
pub use relay::{relay, Direction, RELAY_BUFFER_SIZE};

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

/// Relay errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Counters for relay sessions
#[derive(Debug, Default)]
pub struct SessionStats {
    active: AtomicUsize,
    accepted: AtomicU64,
    dial_failures: AtomicU64,
    bytes_upstream: AtomicU64,
    bytes_downstream: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sessions currently relaying
    pub active: usize,
    /// Connections accepted since start
    pub accepted: u64,
    /// Sessions dropped because the remote could not be dialed
    pub dial_failures: u64,
    /// Bytes copied client -> remote
    pub bytes_upstream: u64,
    /// Bytes copied remote -> client
    pub bytes_downstream: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active.load(Ordering::Acquire),
            accepted: self.accepted.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
        }
    }

    /// Count a new session; the returned guard decrements `active` on drop
    pub(crate) fn open_session(&self) -> SessionGuard<'_> {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::AcqRel);
        SessionGuard { stats: self }
    }

    pub(crate) fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes(&self, direction: Direction, n: usize) {
        let counter = match direction {
            Direction::Upstream => &self.bytes_upstream,
            Direction::Downstream => &self.bytes_downstream,
        };
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Keeps a session counted as active while alive
pub(crate) struct SessionGuard<'a> {
    stats: &'a SessionStats,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_guard_tracks_active() {
        let stats = SessionStats::new();
        {
            let _a = stats.open_session();
            let _b = stats.open_session();
            assert_eq!(stats.snapshot().active, 2);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.active, 0);
        assert_eq!(snap.accepted, 2);
    }

    #[test]
    fn test_byte_counters_by_direction() {
        let stats = SessionStats::new();
        stats.add_bytes(Direction::Upstream, 3);
        stats.add_bytes(Direction::Downstream, 2);
        stats.add_bytes(Direction::Upstream, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_upstream, 4);
        assert_eq!(snap.bytes_downstream, 2);
    }
}
