//! Boundary to the media-graph collaborator
//!
//! The media graph owns the encoded byte stream; this module defines the
//! interface through which client connections are attached to its per-channel
//! fan-out element and through which the graph reports sink lifecycle events.
//!
//! Attachment is one-way and unbuffered on join: a newly added sink receives
//! the broadcast from that moment forward, with no replay of prior stream
//! history. The container format delivered downstream is self-describing, so
//! a client joining mid-stream demuxes from the first complete structure it
//! observes.

use std::future::Future;

use tokio::io::AsyncWrite;
use tokio::sync::broadcast;

pub mod fanout;

pub use fanout::FanoutSink;

/// Write half of an attached client socket, handed to the media graph
pub type SinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Stable handle identifying one client connection across accept, attach,
/// and removal events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    /// Create a sink identity from its numeric handle
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value of the handle
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the media graph is about to force-remove a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// The consumer's read rate fell behind the broadcast rate
    Slow,
    /// Forced removal for any other reason, carrying the raw status code
    Forced(u32),
}

impl RemoveReason {
    /// Map a raw client-status code to a reason
    ///
    /// Status 3 is the slow-consumer code (GStreamer `GST_CLIENT_STATUS_SLOW`);
    /// unknown codes map to a generic forced removal.
    pub fn from_status(status: u32) -> Self {
        match status {
            3 => RemoveReason::Slow,
            other => RemoveReason::Forced(other),
        }
    }
}

impl std::fmt::Display for RemoveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoveReason::Slow => write!(f, "slow consumer"),
            RemoveReason::Forced(code) => write!(f, "forced removal (status {})", code),
        }
    }
}

/// Kind of a sink lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEventKind {
    /// The graph has stopped sending to the sink, for any reason
    Removed,
    /// Early warning that a forced removal is imminent; purely diagnostic,
    /// always followed by `Removed`
    AboutToRemove(RemoveReason),
}

/// One record on the multiplexed sink lifecycle stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkEvent {
    /// Identity of the sink the event concerns
    pub id: SinkId,
    /// What happened
    pub kind: SinkEventKind,
}

impl SinkEvent {
    /// A `removed` notification
    pub fn removed(id: SinkId) -> Self {
        Self {
            id,
            kind: SinkEventKind::Removed,
        }
    }

    /// An `about-to-remove` early warning
    pub fn about_to_remove(id: SinkId, reason: RemoveReason) -> Self {
        Self {
            id,
            kind: SinkEventKind::AboutToRemove(reason),
        }
    }
}

/// Error from an `add_sink` call
///
/// Fatal for the connection being attached, never for other attached sinks.
#[derive(Debug)]
pub enum AttachmentError {
    /// The fan-out element is gone or shutting down
    SinkUnavailable(String),
    /// The identity is already attached
    AlreadyAttached(SinkId),
}

impl std::fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentError::SinkUnavailable(name) => {
                write!(f, "fan-out element unavailable: {}", name)
            }
            AttachmentError::AlreadyAttached(id) => {
                write!(f, "sink {} already attached", id)
            }
        }
    }
}

impl std::error::Error for AttachmentError {}

/// The per-channel broadcast attachment point inside the media graph
///
/// One attachment point fans byte-identical output out to every attached
/// sink; there is no per-client filtering or transcoding at this layer. The
/// implementation is passed into the server at construction time, which keeps
/// ownership explicit and lets tests substitute their own.
pub trait AttachmentPoint: Send + Sync + 'static {
    /// Begin delivering the live broadcast to `id`, writing into `writer`,
    /// from this moment forward
    ///
    /// Registers intent only; must not block waiting for the new client to
    /// acknowledge data. On error the writer is dropped, closing the write
    /// side of the client socket.
    fn add_sink(
        &self,
        id: SinkId,
        writer: SinkWriter,
    ) -> impl Future<Output = Result<(), AttachmentError>> + Send;

    /// Subscribe to the multiplexed sink lifecycle event stream
    ///
    /// For a single sink, attachment always precedes any `Removed` or
    /// `AboutToRemove` record; no ordering holds across different sinks.
    fn events(&self) -> broadcast::Receiver<SinkEvent>;
}
