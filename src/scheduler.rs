//! Cooperative dispatch engine.
//!
//! The scheduler takes at most one event per turn from the
//! [`EventQueue`] and hands it to an [`EventHandler`].  It never blocks:
//! anything that cannot proceed is re-appended and retried on a later
//! turn.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       dispatch_once                          │
//! │                                                              │
//! │   pop head ──▶ outbound backlog? ──yes──▶ repost at tail     │
//! │                      │ no (or teardown)                      │
//! │                      ▼                                       │
//! │  ┌───────────────┬─────────────────────┬──────────────────┐  │
//! │  │ NewData       │ Closing / Abort     │ Native handle    │  │
//! │  │ drain ≤ budget│ close / abort conn  │ disconnect/abort │  │
//! │  │ release hold  │                     │ + release        │  │
//! │  └───────────────┴─────────────────────┴──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use log::{debug, warn};

use crate::connection::{ConnectionId, NativeHandle};
use crate::events::{Event, EventKind, EventQueue, EventTarget};

/// Callbacks the scheduler drives while interpreting an event.
///
/// Decoupled from the runtime so the turn logic is testable on its own.
pub trait EventHandler {
    /// Total entries across every per-connection outbound FIFO.
    fn outbound_backlog(&self) -> usize;
    /// `true` iff the connection exists and is `Connected`.
    fn is_connected(&self, conn: ConnectionId) -> bool;
    /// The protocol core still holds unprocessed inbound bytes.
    fn has_buffered_input(&self, conn: ConnectionId) -> bool;
    /// Run one protocol-core processing pass.
    fn process_input(&mut self, conn: ConnectionId);
    /// Re-enable the native receive path.
    fn release_hold(&mut self, conn: ConnectionId);
    fn close(&mut self, conn: ConnectionId);
    fn abort(&mut self, conn: ConnectionId);
    /// Dispose of a native handle that has no connection record.
    fn release_native(&mut self, kind: EventKind, handle: NativeHandle);
}

/// Outcome of one scheduler turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queue was empty.
    Idle,
    Processed(Event),
    /// Backpressured; the event was moved to the tail.
    Deferred(Event),
    /// The event could not be interpreted or re-queued.
    Dropped(Event),
}

pub struct Scheduler {
    drain_budget: u8,
    turns: u64,
    deferrals: u32,
}

impl Scheduler {
    pub fn new(drain_budget: u8) -> Self {
        Self {
            drain_budget: drain_budget.max(1),
            turns: 0,
            deferrals: 0,
        }
    }

    /// Run one turn: take the head event and process or defer it.
    pub fn dispatch_once(&mut self, queue: &EventQueue, handler: &mut impl EventHandler) -> Dispatch {
        let Some(event) = queue.pop() else {
            queue.settle();
            return Dispatch::Idle;
        };
        self.turns += 1;

        let outcome = if !event.kind.is_teardown() && handler.outbound_backlog() > 0 {
            self.deferrals += 1;
            match queue.repost(event) {
                Ok(()) => Dispatch::Deferred(event),
                Err(e) => {
                    warn!("Sched: could not defer {:?}: {}", event, e);
                    Dispatch::Dropped(event)
                }
            }
        } else {
            self.process(event, handler)
        };

        queue.settle();
        outcome
    }

    fn process(&self, event: Event, handler: &mut impl EventHandler) -> Dispatch {
        debug!("Sched: {:?}", event);
        match (event.kind, event.target) {
            (EventKind::NewData, EventTarget::Connection(conn)) => {
                self.drain(conn, handler);
                Dispatch::Processed(event)
            }
            (EventKind::ConnectionClosing, EventTarget::Connection(conn)) => {
                handler.close(conn);
                Dispatch::Processed(event)
            }
            (EventKind::ConnectionAbort, EventTarget::Connection(conn)) => {
                handler.abort(conn);
                Dispatch::Processed(event)
            }
            (kind, EventTarget::Native(handle)) if kind.is_teardown() => {
                handler.release_native(kind, handle);
                Dispatch::Processed(event)
            }
            _ => {
                warn!("Sched: no handler for {:?}", event);
                Dispatch::Dropped(event)
            }
        }
    }

    /// Feed the protocol core until the buffer is empty, the connection
    /// leaves `Connected`, or the budget is spent.
    fn drain(&self, conn: ConnectionId, handler: &mut impl EventHandler) {
        let mut passes = 0;
        while passes < self.drain_budget
            && handler.is_connected(conn)
            && handler.has_buffered_input(conn)
        {
            handler.process_input(conn);
            passes += 1;
        }
        if passes == self.drain_budget && handler.has_buffered_input(conn) {
            debug!("Sched: drain budget spent on {}", conn);
        }
        handler.release_hold(conn);
    }

    /// Turns that popped an event.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Turns that deferred their event under backpressure.
    pub fn deferrals(&self) -> u32 {
        self.deferrals
    }
}
