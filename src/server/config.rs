//! Channel server configuration

use std::net::SocketAddr;

/// Configuration for one channel's listening socket
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:15000".parse().unwrap(),
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ChannelConfig {
    /// Create a new config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}
