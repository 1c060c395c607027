//! Inbound admission control.
//!
//! Inbound bytes are accepted only when they fit in the protocol core's
//! receive buffer.  Overflow never truncates or overruns: the connection
//! is closed through the event queue instead.

use log::{debug, warn};
use serde::Serialize;

use crate::connection::{ConnectionId, NativeHandle};
use crate::error::{ResourceError, Result};
use crate::events::{Event, EventQueue, Raised, RetryList};
use crate::runtime::ports::{ProtocolCore, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub admitted: u32,
    pub admitted_bytes: u64,
    pub rejected: u32,
}

pub struct AdmissionController {
    rx_buffer_size: usize,
    retry: RetryList,
    stats: AdmissionStats,
}

impl AdmissionController {
    pub fn new(rx_buffer_size: usize) -> Self {
        Self { rx_buffer_size, retry: RetryList::new(), stats: AdmissionStats::default() }
    }

    /// Size of the receive buffer the headroom is measured against.
    pub fn rx_buffer_size(&self) -> usize {
        self.rx_buffer_size
    }

    /// Accept `data` for `conn` if the receive buffer has room.
    ///
    /// On success the bytes are fed to `core`, the native receive path is
    /// put on hold and `NewData` is raised.  Returns `Ok(true)` when the
    /// hold is in place and the scheduler owns releasing it.
    ///
    /// On overflow nothing is fed, `ConnectionClosing` is raised and
    /// `RxBufferFull` is returned.
    ///
    /// Events that find the queue full are parked and re-offered by
    /// [`flush_retries`](Self::flush_retries); the hold stays in place
    /// until the parked `NewData` is drained.
    pub fn admit<C, T>(
        &mut self,
        conn: ConnectionId,
        handle: NativeHandle,
        data: &[u8],
        core: &mut C,
        transport: &mut T,
        events: &EventQueue,
    ) -> Result<bool>
    where
        C: ProtocolCore + ?Sized,
        T: Transport + ?Sized,
    {
        let headroom = core.rx_buffer_free(conn);
        if data.len() > headroom {
            self.stats.rejected += 1;
            warn!(
                "Admit: {} {} bytes exceed {} bytes headroom, closing",
                conn,
                data.len(),
                headroom
            );
            self.retry.raise(events, Event::closing(conn));
            return Err(ResourceError::RxBufferFull.into());
        }

        core.feed(conn, data);
        self.stats.admitted += 1;
        self.stats.admitted_bytes += data.len() as u64;
        debug!("Admit: {} {} bytes", conn, data.len());

        transport.hold_recv(handle);
        if self.retry.raise(events, Event::new_data(conn)) == Raised::Lost {
            // Nothing will drain these bytes; let the next receive retry.
            transport.unhold_recv(handle);
            return Ok(false);
        }
        Ok(true)
    }

    /// Re-offer parked events to the queue.
    pub fn flush_retries(&mut self, events: &EventQueue) -> usize {
        self.retry.flush(events)
    }

    /// Events parked because the queue was full.
    pub fn parked(&self) -> usize {
        self.retry.len()
    }

    /// Forget parked work for a destroyed connection.
    pub fn forget(&mut self, conn: ConnectionId) {
        self.retry.discard(conn);
    }

    pub fn stats(&self) -> AdmissionStats {
        self.stats
    }
}
