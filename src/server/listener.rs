//! Channel output server
//!
//! Owns the listening socket for one logical output channel. Every accepted
//! connection is attached to the channel's broadcast attachment point and
//! handed to its own health monitor; nothing on the accept path ever blocks
//! the delivery path.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::channel::ChannelDescriptor;
use crate::error::{Error, Result};
use crate::graph::{AttachmentPoint, SinkId};
use crate::monitor::{EventRouter, HealthMonitor};
use crate::registry::{ConnectionInfo, ConnectionRegistry};
use crate::server::config::ChannelConfig;
use crate::stats::ChannelStats;

/// Fan-out distribution server for one output channel
pub struct OutputServer<A: AttachmentPoint> {
    config: ChannelConfig,
    descriptor: ChannelDescriptor,
    attachment: Arc<A>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    stats: Arc<ChannelStats>,
    next_sink_id: AtomicU64,
}

impl<A: AttachmentPoint> OutputServer<A> {
    /// Create a server for a channel, wired to its attachment point
    pub fn new(config: ChannelConfig, descriptor: ChannelDescriptor, attachment: Arc<A>) -> Self {
        Self {
            config,
            descriptor,
            attachment,
            registry: Arc::new(ConnectionRegistry::new()),
            router: Arc::new(EventRouter::new()),
            stats: Arc::new(ChannelStats::new()),
            next_sink_id: AtomicU64::new(1),
        }
    }

    /// Get a reference to the connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get a reference to the channel counters
    pub fn stats(&self) -> &Arc<ChannelStats> {
        &self.stats
    }

    /// Channel metadata this server distributes
    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    /// Bind the channel's listening socket
    ///
    /// Bind failure is fatal to starting the channel and is the only failure
    /// this subsystem propagates to the caller.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.config.bind_addr,
                source,
            })?;

        tracing::info!(
            channel = %self.descriptor.name(),
            addr = %self.config.bind_addr,
            "Channel output listening"
        );

        Ok(listener)
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let pump = self.router.spawn_pump(self.attachment.events());

        let result = self.accept_loop(&listener).await;

        pump.abort();
        result
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve_until(listener, shutdown).await
    }

    /// Accept connections on an already-bound listener until shutdown
    ///
    /// On shutdown every monitor's event feed is cut, which releases the
    /// attached sockets and empties the registry. The attachment point is
    /// caller-owned; detaching its sinks (`detach_all`) remains the caller's
    /// teardown step.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let pump = self.router.spawn_pump(self.attachment.events());

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!(channel = %self.descriptor.name(), "Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.router.clear().await;
        pump.abort();
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.admit(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(
                        channel = %self.descriptor.name(),
                        error = %e,
                        "Failed to accept connection"
                    );
                }
            }
        }
    }

    /// Admission path for one accepted connection
    ///
    /// The identity's event route and registry entry exist before `add_sink`
    /// is called, so a removal the attachment point emits while the call is
    /// still in flight lands in the monitor's feed instead of the
    /// unknown-identity bin. The registry stays a superset of the attached
    /// identities: briefly registered before attachment completes, unwound if
    /// attachment fails.
    async fn admit(&self, socket: TcpStream, peer_addr: SocketAddr) {
        self.stats.connection_accepted();

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(
                channel = %self.descriptor.name(),
                peer = %peer_addr,
                error = %e,
                "Failed to configure socket"
            );
            return;
        }

        let id = SinkId::new(self.next_sink_id.fetch_add(1, Ordering::Relaxed));

        tracing::debug!(
            channel = %self.descriptor.name(),
            sink = %id,
            peer = %peer_addr,
            "New connection, adding sink to broadcast"
        );

        let (read_half, write_half) = socket.into_split();

        self.registry
            .register(id, ConnectionInfo::new(peer_addr))
            .await;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.router.insert(id, events_tx).await;

        if let Err(e) = self.attachment.add_sink(id, Box::new(write_half)).await {
            // Fatal for this connection only. The attachment point has
            // dropped the write half; unwinding the registration and
            // dropping the read half closes the socket with the identity
            // absent from the registry again.
            self.registry.unregister(id).await;
            self.router.remove(id).await;
            self.stats.attach_failure();
            tracing::warn!(
                channel = %self.descriptor.name(),
                sink = %id,
                peer = %peer_addr,
                error = %e,
                "Attachment failed, closing connection"
            );
            return;
        }

        let mut monitor = HealthMonitor::new(
            id,
            peer_addr,
            self.descriptor.name(),
            Arc::clone(&self.registry),
            Arc::clone(&self.router),
            Arc::clone(&self.stats),
            events_rx,
            Some(Box::new(read_half)),
        );
        monitor.mark_attached();
        self.stats.sink_attached();

        monitor.spawn();
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        Ok(())
    }

    /// Configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
