//! Runtime configuration parameters
//!
//! Tunables for the dispatch core.  The surrounding firmware injects these
//! at build time or loads them from persistent storage; capacities that size
//! fixed tables are compile-time constants.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capacity of the connection table.  The network-relay control link is
/// tracked separately and does not take a slot.
pub const MAX_CONNECTIONS: usize = 3;

/// Capacity of the interrupt-safe scheduler event queue.
pub const EVENT_QUEUE_CAP: usize = 16;

/// Default TCP listen port for inbound peer connections.
pub const DEFAULT_LISTEN_PORT: u16 = 37008;

/// Core runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Inbound ---
    /// Size of the protocol core's per-connection receive buffer (bytes)
    pub rx_buffer_size: usize,
    /// Maximum protocol-core passes per `NewData` turn
    pub drain_budget: u8,

    // --- Connections ---
    /// Maximum concurrent peer connections
    pub max_connections: usize,
    /// Seconds to wait for native teardown before forced reclamation
    pub close_grace_secs: u32,
    /// Native inactivity timeout for inbound sockets (seconds)
    pub inactivity_timeout_secs: u32,
    /// Disable Nagle on every socket
    pub tcp_nodelay: bool,
    /// Listen port for inbound connections
    pub listen_port: u16,

    // --- Queues ---
    /// Maximum queued outbound buffers per connection
    pub max_outbound_depth: usize,
    /// Maximum queued cross-context messages
    pub relay_queue_depth: usize,

    // --- Diagnostics ---
    /// Interval between statistics log lines (seconds, 0 = off)
    pub stats_log_interval_secs: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            // Inbound
            rx_buffer_size: 1500,
            drain_budget: 10,

            // Connections
            max_connections: MAX_CONNECTIONS,
            close_grace_secs: 5,
            inactivity_timeout_secs: 60,
            tcp_nodelay: true,
            listen_port: DEFAULT_LISTEN_PORT,

            // Queues
            max_outbound_depth: 16,
            relay_queue_depth: 16,

            // Diagnostics
            stats_log_interval_secs: 60,
        }
    }
}

impl RuntimeConfig {
    /// Reject values the runtime cannot operate with.
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn validate(&self) -> Result<()> {
        if self.rx_buffer_size == 0 {
            return Err(Error::Config("rx_buffer_size must be non-zero"));
        }
        if self.drain_budget == 0 {
            return Err(Error::Config("drain_budget must be non-zero"));
        }
        if self.max_connections == 0 || self.max_connections > MAX_CONNECTIONS {
            return Err(Error::Config("max_connections out of range"));
        }
        if self.max_outbound_depth == 0 {
            return Err(Error::Config("max_outbound_depth must be non-zero"));
        }
        if self.relay_queue_depth == 0 {
            return Err(Error::Config("relay_queue_depth must be non-zero"));
        }
        Ok(())
    }

    /// Encode as a compact blob for persistent storage.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("encode failed"))
    }

    /// Decode a stored blob and validate it before use.
    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| Error::Config("stored config corrupted"))?;
        config.validate()?;
        Ok(config)
    }
}
