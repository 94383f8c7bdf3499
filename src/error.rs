//! Crate error types
//!
//! Per-connection failures are contained to the connection that caused them;
//! only channel-wide failures (a listening socket that cannot be bound)
//! propagate to the caller.

use std::net::SocketAddr;

use crate::graph::AttachmentError;

/// Convenience result alias for fallible operations in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Listening socket could not be created or bound. Fatal to starting
    /// the channel; never retried silently.
    Bind {
        /// Address the channel attempted to bind
        addr: SocketAddr,
        /// Underlying socket error
        source: std::io::Error,
    },
    /// The media graph rejected or failed an `add_sink` call
    Attachment(AttachmentError),
    /// Other I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            Error::Attachment(e) => write!(f, "attachment failed: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind { source, .. } => Some(source),
            Error::Attachment(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<AttachmentError> for Error {
    fn from(e: AttachmentError) -> Self {
        Error::Attachment(e)
    }
}
