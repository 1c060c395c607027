//! Runtime counters for telemetry.
//!
//! A [`RuntimeStats`] snapshot is collected on demand from
//! [`Runtime::stats`](crate::runtime::Runtime::stats) and logged
//! periodically by `tick`.  Counters are monotonic since boot.

use serde::Serialize;

use crate::flow::admission::AdmissionStats;
use crate::flow::outbound::FlowStats;
use crate::relay::RelayStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub uptime_secs: u64,
    /// Live connections.
    pub connections: u32,
    /// Entries across every outbound FIFO right now.
    pub outbound_backlog: u32,
    pub events_queued: u32,
    pub events_dropped: u32,
    /// Turns that re-queued their event under backpressure.
    pub events_deferred: u32,
    pub turns: u64,
    /// Closing connections reclaimed after the grace period.
    pub forced_reclaims: u32,
    pub flow: FlowStats,
    pub admission: AdmissionStats,
    pub relay: RelayStats,
}

impl RuntimeStats {
    /// Render as a JSON object for the telemetry channel.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Anything lost or broken since boot.
    pub fn has_faults(&self) -> bool {
        self.events_dropped > 0
            || self.flow.invariant_violations > 0
            || self.flow.sends_failed > 0
            || self.relay.dropped > 0
            || self.relay.undeliverable > 0
    }
}
