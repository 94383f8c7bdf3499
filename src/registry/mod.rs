//! Connection registry
//!
//! Tracks the set of client connections currently attached to one channel.
//! Membership is the only observable property; no ordering is kept across
//! identities. The registry is shared between the accept path and every
//! per-connection monitor, so all operations are safe under concurrent calls
//! from different connection lifecycles.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::graph::SinkId;

/// Details recorded for one attached connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote peer address
    pub peer_addr: SocketAddr,
    /// When the connection was accepted
    pub accepted_at: Instant,
}

impl ConnectionInfo {
    /// Record a connection accepted now
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            accepted_at: Instant::now(),
        }
    }
}

/// Set of currently attached client connections for a channel
///
/// Thread-safe via `RwLock`; holds at most one entry per identity.
pub struct ConnectionRegistry {
    conns: RwLock<HashMap<SinkId, ConnectionInfo>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
        }
    }

    /// Record a connection
    ///
    /// An identity is registered at most once per lifetime; a re-register of
    /// a live identity replaces the entry and is logged, since it indicates
    /// an accept-path bug rather than a client behavior.
    pub async fn register(&self, id: SinkId, info: ConnectionInfo) {
        let mut conns = self.conns.write().await;

        if conns.insert(id, info).is_some() {
            tracing::warn!(sink = %id, "Identity re-registered while still present");
        }
    }

    /// Remove a connection
    ///
    /// Idempotent: unregistering an unknown identity is a no-op. Teardown
    /// and in-flight removal events may both land here for the same identity.
    pub async fn unregister(&self, id: SinkId) {
        self.conns.write().await.remove(&id);
    }

    /// Whether an identity is currently registered
    pub async fn contains(&self, id: SinkId) -> bool {
        self.conns.read().await.contains_key(&id)
    }

    /// Peer address of a registered identity
    pub async fn peer_addr(&self, id: SinkId) -> Option<SocketAddr> {
        self.conns.read().await.get(&id).map(|info| info.peer_addr)
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.conns.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
