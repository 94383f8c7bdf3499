//! Channel output server
//!
//! One server per logical output channel: a listening socket, the connection
//! registry, the event router, and the admission glue between them and the
//! broadcast attachment point.

pub mod config;
pub mod listener;

pub use config::ChannelConfig;
pub use listener::OutputServer;
