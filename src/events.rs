//! Interrupt-safe scheduler event queue.
//!
//! Events are produced by:
//! - Native receive callbacks (new inbound data admitted)
//! - Native error / reset callbacks (abort a socket)
//! - Admission failures and unrecoverable send failures (close a connection)
//! - Accept rejections (close a native handle that never got a connection)
//!
//! Events are consumed by the [`Scheduler`](crate::scheduler::Scheduler),
//! one per turn, in FIFO order.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Native recv  │────▶│              │     │              │
//! │ Native error │────▶│  EventQueue  │────▶│  Scheduler   │
//! │ Flow control │────▶│  (CS mutex)  │     │  (one/turn)  │
//! │ Admission    │────▶│              │     │              │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, warn};

use crate::config::EVENT_QUEUE_CAP;
use crate::connection::{ConnectionId, NativeHandle};
use crate::error::{ResourceError, Result};

/// What the scheduler should do when the event reaches the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Inbound bytes were fed to the protocol core; drain them.
    NewData,
    /// Gracefully close the target.
    ConnectionClosing,
    /// Tear down the target immediately.
    ConnectionAbort,
}

impl EventKind {
    /// Teardown events release resources and are never held back by
    /// outbound backpressure.
    pub fn is_teardown(self) -> bool {
        matches!(self, Self::ConnectionClosing | Self::ConnectionAbort)
    }
}

/// An event refers either to a tracked connection or, when no connection
/// record exists, to a bare native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Connection(ConnectionId),
    Native(NativeHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub target: EventTarget,
}

impl Event {
    pub const fn new_data(conn: ConnectionId) -> Self {
        Self { kind: EventKind::NewData, target: EventTarget::Connection(conn) }
    }

    pub const fn closing(conn: ConnectionId) -> Self {
        Self { kind: EventKind::ConnectionClosing, target: EventTarget::Connection(conn) }
    }

    pub const fn abort(conn: ConnectionId) -> Self {
        Self { kind: EventKind::ConnectionAbort, target: EventTarget::Connection(conn) }
    }

    pub const fn closing_native(handle: NativeHandle) -> Self {
        Self { kind: EventKind::ConnectionClosing, target: EventTarget::Native(handle) }
    }

    pub const fn abort_native(handle: NativeHandle) -> Self {
        Self { kind: EventKind::ConnectionAbort, target: EventTarget::Native(handle) }
    }
}

// ── Queue ─────────────────────────────────────────────────────
//
// Producers may run in interrupt context, so every access goes through
// the critical-section mutex inside the channel.  The `turn_pending`
// flag collapses a burst of notifications into a single scheduled turn.

/// Bounded FIFO of pending [`Event`]s.
///
/// `new` is `const` so the firmware can place the queue in a `static`
/// and hand `&'static EventQueue` to both the ISR side and the runtime.
pub struct EventQueue {
    channel: Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_CAP>,
    turn_pending: AtomicBool,
    queued: AtomicU32,
    dropped: AtomicU32,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            turn_pending: AtomicBool::new(false),
            queued: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Enqueue `event` and schedule a dispatch turn.
    ///
    /// Returns `Ok(true)` when this call moved the queue from idle to
    /// "turn pending", i.e. the caller owns posting the scheduler task.
    /// Safe to call from interrupt context.
    pub fn notify(&self, event: Event) -> Result<bool> {
        if self.channel.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Sched: event queue full, dropped {:?}", event);
            return Err(ResourceError::EventQueueFull.into());
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        Ok(!self.turn_pending.swap(true, Ordering::AcqRel))
    }

    /// Enqueue without counting a full queue as a drop; the caller keeps
    /// the event and offers it again.
    pub(crate) fn offer(&self, event: Event) -> bool {
        if self.channel.try_send(event).is_err() {
            return false;
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.turn_pending.store(true, Ordering::Release);
        true
    }

    /// Take the head event.
    pub fn pop(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }

    /// Append a deferred event back at the tail.
    pub(crate) fn repost(&self, event: Event) -> Result<()> {
        self.channel.try_send(event).map_err(|_| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            ResourceError::EventQueueFull.into()
        })
    }

    /// End of a turn: keep a turn scheduled iff work remains.
    ///
    /// The emptiness check and the flag store form one critical section,
    /// so a producer either lands before it (and the turn stays
    /// scheduled) or sees the cleared flag and schedules a new one.
    pub(crate) fn settle(&self) -> bool {
        critical_section::with(|_| {
            let more = !self.channel.is_empty();
            self.turn_pending.store(more, Ordering::Release);
            more
        })
    }

    /// Whether a dispatch turn is currently scheduled.
    pub fn turn_pending(&self) -> bool {
        self.turn_pending.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Events accepted since boot.
    pub fn queued_count(&self) -> u32 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Events lost to a full queue since boot.
    pub fn dropped_count(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── Retry list ────────────────────────────────────────────────

/// Capacity of a [`RetryList`].
pub const RETRY_CAP: usize = 8;

/// Where a raised event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raised {
    /// In the event queue.
    Queued,
    /// The queue was full; parked for the next flush.
    Deferred,
    /// Both the queue and the retry list were full.
    Lost,
}

/// Events that found the [`EventQueue`] full, kept by their producer
/// and re-offered on the next turn so no teardown or drain is forgotten.
#[derive(Debug, Default)]
pub struct RetryList {
    pending: heapless::Vec<Event, RETRY_CAP>,
}

impl RetryList {
    pub const fn new() -> Self {
        Self { pending: heapless::Vec::new() }
    }

    /// Queue `event`, parking it here when the queue is full.  Events
    /// already parked go first, so order is kept.
    pub fn raise(&mut self, queue: &EventQueue, event: Event) -> Raised {
        if self.pending.is_empty() && queue.offer(event) {
            return Raised::Queued;
        }
        if self.pending.contains(&event) {
            return Raised::Deferred;
        }
        match self.pending.push(event) {
            Ok(()) => {
                debug!("Sched: parked {:?} until the queue drains", event);
                Raised::Deferred
            }
            Err(_) => {
                queue.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Sched: retry list full, lost {:?}", event);
                Raised::Lost
            }
        }
    }

    /// Move parked events into the queue while it has room.  Returns the
    /// number moved.
    pub fn flush(&mut self, queue: &EventQueue) -> usize {
        let mut moved = 0;
        while let Some(&event) = self.pending.first() {
            if !queue.offer(event) {
                break;
            }
            self.pending.remove(0);
            moved += 1;
        }
        moved
    }

    /// Drop parked events aimed at `conn`.
    pub fn discard(&mut self, conn: ConnectionId) {
        self.pending.retain(|e| e.target != EventTarget::Connection(conn));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
