//! Cross-context message relay.
//!
//! Applications and the protocol core never call each other directly.
//! Messages between them are copied into [`CrossContextEvent`]s and
//! delivered one per relay turn, and only while every outbound FIFO is
//! empty.  This bounds call depth when a delivery produces more sends.
//!
//! ```text
//! ┌─────────────┐  AppToCore   ┌──────────────┐
//! │ Application │─────────────▶│              │
//! │  context    │◀─────────────│ Protocol core│
//! └─────────────┘  CoreToApp   └──────────────┘
//!          ▲   (CrossContextRelay, FIFO)   ▲
//! ```

use core::fmt;
use std::collections::VecDeque;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ResourceError, Result};

/// Stable 32-byte identifier of an application service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 32]);

impl fmt::Display for SessionId {
    /// Short form: first four bytes in hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    AppToCore,
    CoreToApp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossContextEvent {
    pub direction: RelayDirection,
    pub session: SessionId,
    pub payload: Box<[u8]>,
}

/// What the relay turn should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayStep {
    /// Nothing queued.
    Idle,
    /// Outbound backlog is non-zero; head left in place.
    Deferred,
    /// Deliver this event.  The caller must call [`CrossContextRelay::finish`]
    /// afterwards.
    Ready(CrossContextEvent),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub queued: u32,
    pub delivered: u32,
    pub deferred: u32,
    pub undeliverable: u32,
    pub dropped: u32,
}

pub struct CrossContextRelay {
    queue: VecDeque<CrossContextEvent>,
    capacity: usize,
    turn_pending: bool,
    stats: RelayStats,
}

impl CrossContextRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            turn_pending: false,
            stats: RelayStats::default(),
        }
    }

    pub fn send_app_to_core(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        self.push(RelayDirection::AppToCore, session, data)
    }

    pub fn send_core_to_app(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        self.push(RelayDirection::CoreToApp, session, data)
    }

    fn push(&mut self, direction: RelayDirection, session: SessionId, data: &[u8]) -> Result<()> {
        if self.queue.len() >= self.capacity {
            self.stats.dropped += 1;
            warn!("Relay: queue full, dropping {:?} for {}", direction, session);
            return Err(ResourceError::RelayQueueFull.into());
        }
        let mut buf = Vec::new();
        if buf.try_reserve_exact(data.len()).is_err() || self.queue.try_reserve(1).is_err() {
            self.stats.dropped += 1;
            return Err(Error::Resource(ResourceError::OutOfMemory));
        }
        buf.extend_from_slice(data);
        self.queue.push_back(CrossContextEvent {
            direction,
            session,
            payload: buf.into_boxed_slice(),
        });
        self.stats.queued += 1;
        self.turn_pending = true;
        Ok(())
    }

    /// Start a relay turn.  With a non-zero `outbound_backlog` the head is
    /// kept and the turn stays scheduled.
    pub fn take_ready(&mut self, outbound_backlog: usize) -> RelayStep {
        if self.queue.is_empty() {
            self.turn_pending = false;
            return RelayStep::Idle;
        }
        if outbound_backlog > 0 {
            self.stats.deferred += 1;
            self.turn_pending = true;
            return RelayStep::Deferred;
        }
        match self.queue.pop_front() {
            Some(ev) => {
                debug!("Relay: {:?} {} ({} bytes)", ev.direction, ev.session, ev.payload.len());
                RelayStep::Ready(ev)
            }
            None => RelayStep::Idle,
        }
    }

    /// End a relay turn that produced `Ready`.  `delivered` is false when the
    /// session no longer resolved.  Returns whether another turn is needed.
    pub fn finish(&mut self, delivered: bool) -> bool {
        if delivered {
            self.stats.delivered += 1;
        } else {
            self.stats.undeliverable += 1;
        }
        self.turn_pending = !self.queue.is_empty();
        self.turn_pending
    }

    pub fn turn_pending(&self) -> bool {
        self.turn_pending
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}
