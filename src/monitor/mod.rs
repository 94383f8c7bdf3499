//! Per-connection health monitoring
//!
//! Every accepted connection gets its own monitor instance that walks the
//! `Accepted → Attached → Closed` lifecycle by consuming that identity's sink
//! events. The `removed` event is the only path that releases the socket; an
//! `about-to-remove` early warning is logged and nothing else. Once `Closed`
//! there is no way back, and late or duplicate events have no effect.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::graph::{RemoveReason, SinkEvent, SinkEventKind, SinkId};
use crate::registry::ConnectionRegistry;
use crate::stats::ChannelStats;

pub mod dispatch;

pub use dispatch::EventRouter;

/// Read half of the monitored client socket
///
/// The write half lives inside the attachment point; the monitor guards the
/// read half and drops it when the connection closes.
pub type SinkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle state of one monitored connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Socket accepted, not yet attached to the broadcast
    Accepted,
    /// Attached and receiving the broadcast
    Attached,
    /// Detached and released; terminal
    Closed,
}

/// Monitor for a single client connection
pub struct HealthMonitor {
    id: SinkId,
    peer_addr: SocketAddr,
    channel: String,
    registry: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    stats: Arc<ChannelStats>,
    events: mpsc::UnboundedReceiver<SinkEvent>,
    reader: Option<SinkReader>,
    state: ConnState,
}

impl HealthMonitor {
    /// Create a monitor for a freshly accepted connection
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SinkId,
        peer_addr: SocketAddr,
        channel: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        router: Arc<EventRouter>,
        stats: Arc<ChannelStats>,
        events: mpsc::UnboundedReceiver<SinkEvent>,
        reader: Option<SinkReader>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            channel: channel.into(),
            registry,
            router,
            stats,
            events,
            reader,
            state: ConnState::Accepted,
        }
    }

    /// Identity this monitor owns
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Record a successful `add_sink` call
    pub fn mark_attached(&mut self) {
        if self.state == ConnState::Accepted {
            self.state = ConnState::Attached;
        }
    }

    /// Consume lifecycle events until the connection closes
    ///
    /// Exits after the `removed` event releases the socket, or when the event
    /// feed is cut off by channel teardown (which releases it the same way).
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            // Matching discipline: this monitor only acts on its own identity
            if event.id != self.id {
                tracing::trace!(
                    sink = %self.id,
                    other = %event.id,
                    "Event for different identity ignored"
                );
                continue;
            }

            if self.state == ConnState::Closed {
                break;
            }

            match event.kind {
                SinkEventKind::AboutToRemove(RemoveReason::Slow) => {
                    self.stats.slow_warning();
                    tracing::warn!(
                        channel = %self.channel,
                        sink = %self.id,
                        peer = %self.peer_addr,
                        "Sink about to be removed from broadcast: too slow"
                    );
                }
                SinkEventKind::AboutToRemove(reason) => {
                    tracing::debug!(
                        channel = %self.channel,
                        sink = %self.id,
                        reason = %reason,
                        "Sink about to be removed from broadcast"
                    );
                }
                SinkEventKind::Removed => {
                    self.close().await;
                    break;
                }
            }
        }

        // Feed cut off without a removal event: channel teardown. The socket
        // still has to be released.
        if self.state != ConnState::Closed {
            self.close().await;
        }
    }

    /// Spawn the monitor on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn close(&mut self) {
        self.state = ConnState::Closed;
        self.registry.unregister(self.id).await;
        self.router.remove(self.id).await;
        self.stats.sink_detached();

        // Dropping the read half releases this side of the socket; the
        // attachment point has already dropped the write half.
        self.reader = None;

        tracing::debug!(
            channel = %self.channel,
            sink = %self.id,
            peer = %self.peer_addr,
            "Sink removed from broadcast, connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::registry::ConnectionInfo;

    use super::*;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        router: Arc<EventRouter>,
        stats: Arc<ChannelStats>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(ConnectionRegistry::new()),
                router: Arc::new(EventRouter::new()),
                stats: Arc::new(ChannelStats::new()),
            }
        }

        /// Register and attach one connection, returning its event feed
        async fn attach(&self, id: SinkId) -> (mpsc::UnboundedSender<SinkEvent>, JoinHandle<()>) {
            let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
            self.registry.register(id, ConnectionInfo::new(peer)).await;

            let (tx, rx) = mpsc::unbounded_channel();
            self.router.insert(id, tx.clone()).await;

            let mut monitor = HealthMonitor::new(
                id,
                peer,
                "mix",
                Arc::clone(&self.registry),
                Arc::clone(&self.router),
                Arc::clone(&self.stats),
                rx,
                None,
            );
            monitor.mark_attached();
            self.stats.sink_attached();

            (tx, monitor.spawn())
        }
    }

    async fn join(handle: JoinHandle<()>) {
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not finish")
            .expect("monitor panicked");
    }

    #[tokio::test]
    async fn test_removed_unregisters_and_closes() {
        // Accept, attach, then a clean removal
        let h = Harness::new();
        let c1 = SinkId::new(1);
        let (tx, handle) = h.attach(c1).await;

        assert!(h.registry.contains(c1).await);

        tx.send(SinkEvent::removed(c1)).unwrap();
        join(handle).await;

        assert!(!h.registry.contains(c1).await);
        assert_eq!(h.router.route_count().await, 0);
        assert_eq!(h.stats.snapshot().attached, 0);
    }

    #[tokio::test]
    async fn test_slow_warning_does_not_close() {
        // The early warning logs only; the subsequent removal closes
        let h = Harness::new();
        let c2 = SinkId::new(2);
        let (tx, handle) = h.attach(c2).await;

        tx.send(SinkEvent::about_to_remove(c2, RemoveReason::Slow))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.registry.contains(c2).await);
        assert_eq!(h.stats.snapshot().slow_warnings, 1);

        tx.send(SinkEvent::removed(c2)).unwrap();
        join(handle).await;

        assert!(!h.registry.contains(c2).await);
    }

    #[tokio::test]
    async fn test_removal_is_isolated_per_connection() {
        // Two live connections; removing one leaves the other attached
        let h = Harness::new();
        let c3 = SinkId::new(3);
        let c4 = SinkId::new(4);
        let (tx3, handle3) = h.attach(c3).await;
        let (_tx4, _handle4) = h.attach(c4).await;

        tx3.send(SinkEvent::removed(c3)).unwrap();
        join(handle3).await;

        assert!(!h.registry.contains(c3).await);
        assert!(h.registry.contains(c4).await);
    }

    #[tokio::test]
    async fn test_late_events_after_close_have_no_effect() {
        let h = Harness::new();
        let id = SinkId::new(5);
        let (tx, handle) = h.attach(id).await;

        tx.send(SinkEvent::removed(id)).unwrap();
        join(handle).await;

        // Monitor is gone and its route removed; a duplicate removal goes
        // through the stale-event path without observable effect.
        h.router.dispatch(SinkEvent::removed(id)).await;
        assert!(!h.registry.contains(id).await);
        assert_eq!(h.stats.snapshot().attached, 0);
    }

    #[tokio::test]
    async fn test_foreign_identity_is_ignored() {
        let h = Harness::new();
        let id = SinkId::new(6);
        let (tx, handle) = h.attach(id).await;

        // Misrouted record for someone else must not close this connection
        tx.send(SinkEvent::removed(SinkId::new(99))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.registry.contains(id).await);

        tx.send(SinkEvent::removed(id)).unwrap();
        join(handle).await;
        assert!(!h.registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_feed_cutoff_releases_connection() {
        // Channel teardown drops the feed sender without a removal event
        let h = Harness::new();
        let id = SinkId::new(7);
        let (tx, handle) = h.attach(id).await;

        h.router.remove(id).await;
        drop(tx);
        join(handle).await;

        assert!(!h.registry.contains(id).await);
    }

    #[test]
    fn test_state_transitions() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut monitor = HealthMonitor::new(
            SinkId::new(8),
            "127.0.0.1:50000".parse().unwrap(),
            "mix",
            Arc::new(ConnectionRegistry::new()),
            Arc::new(EventRouter::new()),
            Arc::new(ChannelStats::new()),
            rx,
            None,
        );

        assert_eq!(monitor.state(), ConnState::Accepted);
        monitor.mark_attached();
        assert_eq!(monitor.state(), ConnState::Attached);
        // Attaching twice is a no-op
        monitor.mark_attached();
        assert_eq!(monitor.state(), ConnState::Attached);
    }
}
