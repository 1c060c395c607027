//! Connection records and the keyed connection table.
//!
//! A [`Connection`] tracks one transport-level session independent of the
//! native socket object.  The native layer is referred to only through an
//! opaque [`NativeHandle`]; everything else in the runtime refers to a
//! connection by its [`ConnectionId`], so a late native callback can never
//! reach a connection that has already been destroyed.
//!
//! ```text
//!            connect()/accept
//!                  │
//!                  ▼
//!   ┌────────────┐   native ok   ┌───────────┐  close   ┌─────────┐
//!   │ Connecting │──────────────▶│ Connected │─────────▶│ Closing │
//!   └─────┬──────┘               └─────┬─────┘          └────┬────┘
//!         │ error                      │ error / teardown    │ teardown or
//!         ▼                            ▼                     ▼ grace expiry
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │                        Disconnected                          │
//!   └──────────────────────────────────────────────────────────────┘
//! ```

use core::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::MAX_CONNECTIONS;
use crate::error::{Error, ResourceError, Result};

// ───────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────

/// Stable key for a connection, valid until the connection is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u16);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to a socket object owned by the native transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeHandle(pub u32);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// IPv4 address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: [u8; 4],
    pub port: u16,
}

impl Endpoint {
    pub const UNSPECIFIED: Self = Self { ip: [0; 4], port: 0 };

    pub const fn new(ip: [u8; 4], port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.ip;
        write!(f, "{a}.{b}.{c}.{d}:{}", self.port)
    }
}

// ───────────────────────────────────────────────────────────────
// Connection
// ───────────────────────────────────────────────────────────────

/// Lifecycle state as observed by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Disconnected,
}

impl ConnectionState {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: ConnectionState) -> bool {
        use ConnectionState::{Closing, Connected, Connecting, Disconnected};
        matches!(
            (self, to),
            (Connecting, Connected)
                | (Connected, Closing)
                | (Closing, Disconnected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// We initiated the connect.
    Outbound,
    /// A peer connected to our listener.
    Inbound,
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    origin: Origin,
    remote: Endpoint,
    local: Endpoint,
    state: ConnectionState,
    via_relay: bool,
    handle: Option<NativeHandle>,
    /// Relative-clock second at which closing began.
    close_started: Option<u64>,
    /// Native receive path is on hold until the scheduler drains.
    rx_held: bool,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn remote(&self) -> Endpoint {
        self.remote
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn via_relay(&self) -> bool {
        self.via_relay
    }

    pub fn handle(&self) -> Option<NativeHandle> {
        self.handle
    }

    pub fn close_started(&self) -> Option<u64> {
        self.close_started
    }

    pub fn is_rx_held(&self) -> bool {
        self.rx_held
    }

    pub(crate) fn set_rx_held(&mut self, held: bool) {
        self.rx_held = held;
    }

    pub(crate) fn set_handle(&mut self, handle: NativeHandle) {
        self.handle = Some(handle);
    }

    pub(crate) fn set_local(&mut self, local: Endpoint) {
        self.local = local;
    }

    /// Move to `to`, rejecting transitions outside the lifecycle graph.
    pub(crate) fn transition(&mut self, to: ConnectionState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::Invariant("illegal connection state transition"));
        }
        debug!("Conn: {} {:?} -> {:?}", self.id, self.state, to);
        self.state = to;
        Ok(())
    }

    /// Enter `Closing` and stamp the start of the grace period.
    pub(crate) fn begin_closing(&mut self, now_secs: u64) -> Result<()> {
        self.transition(ConnectionState::Closing)?;
        self.close_started = Some(now_secs);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Connection table
// ───────────────────────────────────────────────────────────────

/// Fixed-capacity table of live connections, keyed by [`ConnectionId`].
pub struct ConnectionTable {
    slots: heapless::Vec<Connection, MAX_CONNECTIONS>,
    limit: usize,
    next_id: u16,
}

impl ConnectionTable {
    /// `limit` caps the live connections below the table capacity.
    pub fn new(limit: usize) -> Self {
        Self {
            slots: heapless::Vec::new(),
            limit: limit.min(MAX_CONNECTIONS),
            next_id: 1,
        }
    }

    /// Register a connection we are about to open.
    pub fn insert_outbound(&mut self, remote: Endpoint, via_relay: bool) -> Result<ConnectionId> {
        self.insert(Origin::Outbound, remote, Endpoint::UNSPECIFIED, via_relay, None, ConnectionState::Connecting)
    }

    /// Register a connection accepted from a peer.  Accepted sockets are
    /// already established, so the record starts in `Connected`.
    pub fn insert_inbound(
        &mut self,
        handle: NativeHandle,
        local: Endpoint,
        remote: Endpoint,
    ) -> Result<ConnectionId> {
        self.insert(Origin::Inbound, remote, local, false, Some(handle), ConnectionState::Connected)
    }

    fn insert(
        &mut self,
        origin: Origin,
        remote: Endpoint,
        local: Endpoint,
        via_relay: bool,
        handle: Option<NativeHandle>,
        state: ConnectionState,
    ) -> Result<ConnectionId> {
        if self.slots.len() >= self.limit {
            return Err(ResourceError::ConnectionTableFull.into());
        }
        let id = self.allocate_id();
        let conn = Connection {
            id,
            origin,
            remote,
            local,
            state,
            via_relay,
            handle,
            close_started: None,
            rx_held: false,
        };
        self.slots
            .push(conn)
            .map_err(|_| Error::Resource(ResourceError::ConnectionTableFull))?;
        Ok(id)
    }

    /// Next id not currently in use.  Ids wrap but skip live entries and 0.
    fn allocate_id(&mut self) -> ConnectionId {
        loop {
            let candidate = ConnectionId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if self.get(candidate).is_none() {
                return candidate;
            }
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.slots.iter_mut().find(|c| c.id == id)
    }

    /// Resolve a native handle back to its connection.
    pub fn by_handle(&self, handle: NativeHandle) -> Option<ConnectionId> {
        self.slots
            .iter()
            .find(|c| c.handle == Some(handle))
            .map(|c| c.id)
    }

    /// Resolve a native callback by its address 4-tuple.
    pub fn identify(&self, remote: Endpoint, local: Endpoint) -> Option<ConnectionId> {
        self.slots
            .iter()
            .find(|c| c.remote == remote && c.local == local)
            .map(|c| c.id)
    }

    /// Destroy a connection record.  The caller is responsible for having
    /// invalidated every other association keyed by `id` first.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let idx = self.slots.iter().position(|c| c.id == id)?;
        Some(self.slots.swap_remove(idx))
    }

    /// Ids of every connection currently in `Closing`.
    pub fn closing(&self) -> heapless::Vec<ConnectionId, MAX_CONNECTIONS> {
        self.slots
            .iter()
            .filter(|c| c.state == ConnectionState::Closing)
            .map(|c| c.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.limit
    }
}
