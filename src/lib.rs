//! Multi-client fan-out distribution for live A/V output channels
//!
//! This crate implements the connection side of a live video-mixing server:
//! it accepts TCP consumers (recorders, relays, viewers) on a per-channel
//! listening socket, attaches each one to the channel's shared broadcast
//! point inside the media graph, and evicts consumers that cannot keep up
//! without stalling anyone else.
//!
//! # Architecture
//!
//! ```text
//!                    OutputServer<A: AttachmentPoint>
//!            ┌───────────────────────────────────────────┐
//!            │ accept loop          ConnectionRegistry   │
//!            │     │                      ▲  │           │
//!            │     ▼                      │  ▼           │
//!            │ add_sink(id, writer) ──► HealthMonitor    │
//!            │     │                      ▲ (one per     │
//!            │     ▼                      │  connection) │
//!            │ AttachmentPoint ──events──► EventRouter   │
//!            └───────────────────────────────────────────┘
//!                    │ byte-identical chunks
//!         ┌──────────┼──────────┐
//!         ▼          ▼          ▼
//!      [client]   [client]   [client]
//! ```
//!
//! Each accepted connection gets a stable [`SinkId`](graph::SinkId). The
//! attachment point fans the live mux out to every attached sink from the
//! moment of attachment, with no replay; the container format delivered is
//! self-describing, so a client joining mid-stream demuxes from the first
//! complete structure it sees. Sink lifecycle events come back on one
//! multiplexed stream and are routed by identity to the monitor owning that
//! connection, which is the only place the socket is released.
//!
//! The media graph itself is an external collaborator behind the
//! [`AttachmentPoint`](graph::AttachmentPoint) trait; [`FanoutSink`](graph::FanoutSink)
//! is the in-process implementation with multifdsink-style slow-consumer
//! eviction.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use avfan_rs::{ChannelConfig, ChannelDescriptor, ChannelKind, FanoutSink, OutputServer};
//!
//! #[tokio::main]
//! async fn main() -> avfan_rs::Result<()> {
//!     let descriptor = ChannelDescriptor::new(
//!         "mix",
//!         ChannelKind::AudioVideo { audio_streams: 2 },
//!         500,
//!     );
//!     let sink = Arc::new(FanoutSink::new(&descriptor));
//!     let config = ChannelConfig::with_addr("0.0.0.0:15000".parse().unwrap());
//!     let server = OutputServer::new(config, descriptor, Arc::clone(&sink));
//!
//!     // Elsewhere: the producer calls sink.feed(chunk) for every mux chunk
//!     server.run().await
//! }
//! ```

pub mod channel;
pub mod error;
pub mod graph;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod stats;

pub use channel::{ChannelDescriptor, ChannelKind};
pub use error::{Error, Result};
pub use graph::{
    AttachmentError, AttachmentPoint, FanoutSink, RemoveReason, SinkEvent, SinkEventKind, SinkId,
    SinkWriter,
};
pub use monitor::{ConnState, EventRouter, HealthMonitor};
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use server::{ChannelConfig, OutputServer};
pub use stats::{ChannelStats, StatsSnapshot};
