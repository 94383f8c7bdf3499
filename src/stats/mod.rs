//! Per-channel counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one output channel
///
/// Updated from the accept path and the per-connection monitors; read by
/// operators through `snapshot`.
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Connections accepted over the channel's lifetime
    accepted: AtomicU64,
    /// Sinks currently attached to the broadcast
    attached: AtomicU64,
    /// Slow-consumer warnings observed
    slow_warnings: AtomicU64,
    /// Connections dropped because `add_sink` failed
    attach_failures: AtomicU64,
}

impl ChannelStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection was accepted
    pub fn connection_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// A sink was attached to the broadcast
    pub fn sink_attached(&self) {
        self.attached.fetch_add(1, Ordering::Relaxed);
    }

    /// An attached sink was released
    pub fn sink_detached(&self) {
        self.attached.fetch_sub(1, Ordering::Relaxed);
    }

    /// A slow-consumer warning was observed
    pub fn slow_warning(&self) {
        self.slow_warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// An `add_sink` call failed
    pub fn attach_failure(&self) {
        self.attach_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            attached: self.attached.load(Ordering::Relaxed),
            slow_warnings: self.slow_warnings.load(Ordering::Relaxed),
            attach_failures: self.attach_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time channel counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections accepted over the channel's lifetime
    pub accepted: u64,
    /// Sinks currently attached
    pub attached: u64,
    /// Slow-consumer warnings observed
    pub slow_warnings: u64,
    /// Connections dropped because `add_sink` failed
    pub attach_failures: u64,
}
