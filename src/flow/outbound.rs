//! Per-connection outbound flow control.
//!
//! Every connection able to send owns one [`ActiveConnectionRecord`]: an
//! ordered FIFO of owned byte buffers plus a `busy` flag.  At most one
//! buffer per connection is ever handed to the native layer; the next one
//! goes out only after the previous completion.
//!
//! ```text
//!  enqueue_send ──▶ [ e0 | e1 | e2 ]  ──head──▶ Transport::send
//!                     ▲                            │
//!                     └──── pop + submit next ◀── Sent
//! ```

use std::collections::VecDeque;

use log::{debug, error, warn};
use serde::Serialize;

use crate::config::MAX_CONNECTIONS;
use crate::connection::{ConnectionId, NativeHandle};
use crate::error::{Error, ResourceError, Result};
use crate::events::{Event, EventQueue, RetryList};
use crate::runtime::ports::{SendStatus, Transport};

/// One pending outbound buffer, owned by the flow controller.
#[derive(Debug)]
pub struct OutboundQueueEntry {
    data: Box<[u8]>,
}

impl OutboundQueueEntry {
    /// Copy `bytes` into a fresh allocation, failing instead of aborting
    /// when the heap is exhausted.
    fn copy_from(bytes: &[u8]) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes.len())
            .map_err(|_| Error::Resource(ResourceError::OutOfMemory))?;
        buf.extend_from_slice(bytes);
        Ok(Self { data: buf.into_boxed_slice() })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug)]
pub struct ActiveConnectionRecord {
    conn: ConnectionId,
    handle: NativeHandle,
    fifo: VecDeque<OutboundQueueEntry>,
    /// Head has been submitted and its completion not yet observed.
    busy: bool,
}

/// What happened to a buffer handed to [`OutboundController::enqueue_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The FIFO head went to the native layer during this call.
    Submitted,
    /// Queued behind a transmission in flight.
    Queued,
    /// Native buffers are full; the head waits for `Sent`/`Writable`.
    Stalled,
    /// The native layer failed; the head was dropped and the connection
    /// is being closed.
    Aborted,
}

/// Counters maintained by the outbound controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowStats {
    pub sends_submitted: u32,
    pub sends_queued: u32,
    pub sends_stalled: u32,
    pub sends_failed: u32,
    pub sends_rejected: u32,
    pub buffers_freed: u32,
    pub invariant_violations: u32,
    pub peak_backlog: u32,
}

pub struct OutboundController {
    records: heapless::Vec<ActiveConnectionRecord, MAX_CONNECTIONS>,
    max_depth: usize,
    /// Close requests that found the event queue full.
    retry: RetryList,
    stats: FlowStats,
}

impl OutboundController {
    pub fn new(max_depth: usize) -> Self {
        Self {
            records: heapless::Vec::new(),
            max_depth: max_depth.max(1),
            retry: RetryList::new(),
            stats: FlowStats::default(),
        }
    }

    /// Give `conn` send capability.
    pub fn register(&mut self, conn: ConnectionId, handle: NativeHandle) -> Result<()> {
        if self.record(conn).is_some() {
            return Err(Error::Invariant("connection already has an outbound record"));
        }
        self.records
            .push(ActiveConnectionRecord { conn, handle, fifo: VecDeque::new(), busy: false })
            .map_err(|_| Error::Resource(ResourceError::ConnectionTableFull))
    }

    /// Append a copy of `bytes` and submit it if nothing is in flight.
    ///
    /// Fails only when `conn` cannot send, the FIFO is at its depth limit,
    /// or the copy cannot be allocated; in those cases nothing is queued.
    pub fn enqueue_send<T: Transport + ?Sized>(
        &mut self,
        conn: ConnectionId,
        bytes: &[u8],
        transport: &mut T,
        events: &EventQueue,
    ) -> Result<SendOutcome> {
        let max_depth = self.max_depth;
        let Some(idx) = self.index_of(conn) else {
            self.stats.sends_rejected += 1;
            return Err(Error::NotConnected(conn));
        };
        let record = &mut self.records[idx];

        if record.fifo.len() >= max_depth {
            self.stats.sends_rejected += 1;
            warn!("Flow: {} FIFO full ({} entries)", conn, max_depth);
            return Err(ResourceError::OutboundFifoFull.into());
        }
        let entry = match OutboundQueueEntry::copy_from(bytes) {
            Ok(entry) => entry,
            Err(e) => {
                self.stats.sends_rejected += 1;
                warn!("Flow: {} could not copy {} bytes", conn, bytes.len());
                return Err(e);
            }
        };
        if record.fifo.try_reserve(1).is_err() {
            self.stats.sends_rejected += 1;
            return Err(ResourceError::OutOfMemory.into());
        }
        record.fifo.push_back(entry);

        let outcome = if record.busy {
            self.stats.sends_queued += 1;
            SendOutcome::Queued
        } else {
            Self::pump(record, transport, events, &mut self.retry, &mut self.stats)
        };
        self.note_backlog();
        Ok(outcome)
    }

    /// Native completion for the in-flight head of `conn`.
    pub fn on_send_complete<T: Transport + ?Sized>(
        &mut self,
        conn: ConnectionId,
        transport: &mut T,
        events: &EventQueue,
    ) -> Result<()> {
        let Some(idx) = self.index_of(conn) else {
            debug!("Flow: completion for {} without record", conn);
            return Ok(());
        };
        let record = &mut self.records[idx];
        if !record.busy || record.fifo.is_empty() {
            self.stats.invariant_violations += 1;
            error!(
                "Flow: completion for {} while idle (busy={}, queued={})",
                conn,
                record.busy,
                record.fifo.len()
            );
            return Err(Error::Invariant("send completion with nothing in flight"));
        }

        record.fifo.pop_front();
        record.busy = false;
        self.stats.buffers_freed += 1;
        if !record.fifo.is_empty() {
            Self::pump(record, transport, events, &mut self.retry, &mut self.stats);
        }
        Ok(())
    }

    /// Native buffers have room again; retry a stalled head.
    pub fn on_writable<T: Transport + ?Sized>(
        &mut self,
        conn: ConnectionId,
        transport: &mut T,
        events: &EventQueue,
    ) {
        let Some(idx) = self.index_of(conn) else {
            return;
        };
        let record = &mut self.records[idx];
        if !record.busy && !record.fifo.is_empty() {
            Self::pump(record, transport, events, &mut self.retry, &mut self.stats);
        }
    }

    /// Submit the head of an idle record.
    fn pump<T: Transport + ?Sized>(
        record: &mut ActiveConnectionRecord,
        transport: &mut T,
        events: &EventQueue,
        retry: &mut RetryList,
        stats: &mut FlowStats,
    ) -> SendOutcome {
        let Some(head) = record.fifo.front() else {
            return SendOutcome::Queued;
        };
        match transport.send(record.handle, head.data()) {
            SendStatus::Accepted => {
                record.busy = true;
                stats.sends_submitted += 1;
                SendOutcome::Submitted
            }
            SendStatus::TemporarilyFull => {
                stats.sends_stalled += 1;
                debug!("Flow: {} native buffers full, holding head", record.conn);
                SendOutcome::Stalled
            }
            SendStatus::Failed(e) => {
                stats.sends_failed += 1;
                warn!("Flow: {} send failed: {}", record.conn, e);
                record.fifo.pop_front();
                stats.buffers_freed += 1;
                record.busy = false;
                // Closing event is queued, never a synchronous disconnect.
                retry.raise(events, Event::closing(record.conn));
                SendOutcome::Aborted
            }
        }
    }

    /// Re-offer close requests parked while the event queue was full.
    pub fn flush_retries(&mut self, events: &EventQueue) -> usize {
        self.retry.flush(events)
    }

    pub fn parked(&self) -> usize {
        self.retry.len()
    }

    /// Drop the record for `conn`, freeing every queued buffer.  Returns
    /// the number of buffers freed.
    pub fn remove(&mut self, conn: ConnectionId) -> usize {
        self.retry.discard(conn);
        let Some(idx) = self.index_of(conn) else {
            return 0;
        };
        let record = self.records.swap_remove(idx);
        let freed = record.fifo.len();
        self.stats.buffers_freed += freed as u32;
        if freed > 0 {
            debug!("Flow: {} discarded {} queued buffers", conn, freed);
        }
        freed
    }

    /// Total entries across every FIFO, in-flight heads included.
    pub fn backlog(&self) -> usize {
        self.records.iter().map(|r| r.fifo.len()).sum()
    }

    pub fn queued(&self, conn: ConnectionId) -> usize {
        self.record(conn).map_or(0, |r| r.fifo.len())
    }

    pub fn is_busy(&self, conn: ConnectionId) -> bool {
        self.record(conn).is_some_and(|r| r.busy)
    }

    pub fn is_registered(&self, conn: ConnectionId) -> bool {
        self.record(conn).is_some()
    }

    pub fn stats(&self) -> FlowStats {
        self.stats
    }

    fn record(&self, conn: ConnectionId) -> Option<&ActiveConnectionRecord> {
        self.records.iter().find(|r| r.conn == conn)
    }

    fn index_of(&self, conn: ConnectionId) -> Option<usize> {
        self.records.iter().position(|r| r.conn == conn)
    }

    fn note_backlog(&mut self) {
        let backlog = self.backlog() as u32;
        if backlog > self.stats.peak_backlog {
            self.stats.peak_backlog = backlog;
        }
    }
}
