//! Unified error types for the PeerLink runtime.
//!
//! Every fallible operation funnels into [`Error`], keeping the caller-side
//! handling uniform across the scheduler, the flow controllers and the
//! relay.  All variants are `Copy` so they can be returned from callback
//! entry points without allocation.

use core::fmt;

use crate::connection::ConnectionId;

// ---------------------------------------------------------------------------
// Top-level runtime error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A queue, table or buffer allocation ran out of space.
    Resource(ResourceError),
    /// The native transport reported a failure.
    Transport(TransportError),
    /// A cross-context message could not be routed.
    Relay(RelayError),
    /// The connection is unknown or no longer able to carry data.
    NotConnected(ConnectionId),
    /// A native-layer contract was broken (e.g. completion with empty FIFO).
    Invariant(&'static str),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(e) => write!(f, "resource: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Relay(e) => write!(f, "relay: {e}"),
            Self::NotConnected(id) => write!(f, "connection {id} not connected"),
            Self::Invariant(msg) => write!(f, "invariant violated: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource exhaustion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// The scheduler event queue is full; the event was dropped.
    EventQueueFull,
    /// The per-connection outbound FIFO reached its configured depth.
    OutboundFifoFull,
    /// A buffer allocation failed.
    OutOfMemory,
    /// No free slot in the connection table.
    ConnectionTableFull,
    /// Inbound bytes exceed the receive-buffer headroom.
    RxBufferFull,
    /// The cross-context relay queue is full.
    RelayQueueFull,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventQueueFull => write!(f, "event queue full"),
            Self::OutboundFifoFull => write!(f, "outbound FIFO full"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::ConnectionTableFull => write!(f, "connection table full"),
            Self::RxBufferFull => write!(f, "receive buffer full"),
            Self::RelayQueueFull => write!(f, "relay queue full"),
        }
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

// ---------------------------------------------------------------------------
// Transport failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Outbound connect could not be started.
    ConnectFailed,
    /// The native layer refused the transmit and cannot recover.
    SendFailed,
    /// Native send buffers are full; try again after the next completion.
    Busy,
    /// No link is open for this operation.
    NotOpen,
    /// The link is already open.
    AlreadyOpen,
    /// The native handle does not refer to a live socket.
    InvalidHandle,
    /// Disconnect request rejected by the native layer.
    DisconnectFailed,
    /// Generic socket I/O error.
    Io,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::SendFailed => write!(f, "send failed"),
            Self::Busy => write!(f, "send buffers full"),
            Self::NotOpen => write!(f, "link not open"),
            Self::AlreadyOpen => write!(f, "link already open"),
            Self::InvalidHandle => write!(f, "invalid native handle"),
            Self::DisconnectFailed => write!(f, "disconnect failed"),
            Self::Io => write!(f, "socket I/O error"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Relay errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// The session no longer resolves to a live application context.
    UnknownSession,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSession => write!(f, "unknown session"),
        }
    }
}

impl From<RelayError> for Error {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Runtime-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
