//! Event routing
//!
//! The attachment point publishes one multiplexed stream of sink lifecycle
//! records; each accepted connection has its own monitor. The router maps
//! identities to monitors so a record only ever reaches the monitor that owns
//! that identity, instead of every monitor filtering the full stream.

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::graph::{SinkEvent, SinkId};

/// Routes multiplexed sink events to per-connection monitors
pub struct EventRouter {
    routes: RwLock<HashMap<SinkId, mpsc::UnboundedSender<SinkEvent>>>,
}

impl EventRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Register the event feed for an identity
    pub async fn insert(&self, id: SinkId, tx: mpsc::UnboundedSender<SinkEvent>) {
        self.routes.write().await.insert(id, tx);
    }

    /// Drop the event feed for an identity (idempotent)
    pub async fn remove(&self, id: SinkId) {
        self.routes.write().await.remove(&id);
    }

    /// Drop every event feed (channel teardown)
    ///
    /// Closing a feed is the teardown signal for its monitor, which releases
    /// the socket and registry entry on the way out.
    pub async fn clear(&self) {
        self.routes.write().await.clear();
    }

    /// Number of live routes
    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Deliver one record to the monitor owning its identity
    ///
    /// Records for unknown identities are dropped silently: a removal event
    /// racing connection teardown is expected, not an error.
    pub async fn dispatch(&self, event: SinkEvent) {
        let routes = self.routes.read().await;

        match routes.get(&event.id) {
            Some(tx) => {
                // A monitor that already exited drops its receiver; stale
                // sends fall into the same ignored category.
                let _ = tx.send(event);
            }
            None => {
                tracing::trace!(sink = %event.id, "Event for unknown sink ignored");
            }
        }
    }

    /// Spawn the pump task that moves records from the attachment point's
    /// event stream into the per-monitor feeds
    ///
    /// Returns a handle the server aborts on shutdown.
    pub fn spawn_pump(
        self: &std::sync::Arc<Self>,
        mut events: broadcast::Receiver<SinkEvent>,
    ) -> JoinHandle<()> {
        let router = std::sync::Arc::clone(self);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => router.dispatch(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed = missed, "Sink event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
