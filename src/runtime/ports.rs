//! Port traits: the boundary between the dispatch core and its collaborators.
//!
//! ```text
//!   native socket layer ──▶ Transport ──▶ Runtime ──▶ ProtocolCore
//!                                           ▲   │
//!                               CoreIo ◀────┘   └──▶ AppRegistry / AppContext
//! ```
//!
//! The runtime consumes these via generics at each entry point, so it
//! never owns a socket, a protocol engine or an application directly.

use crate::connection::{ConnectionId, Endpoint, NativeHandle};
use crate::error::{Result, TransportError};
use crate::flow::outbound::SendOutcome;
use crate::relay::SessionId;

// ───────────────────────────────────────────────────────────────
// Native transport (driven adapter: runtime → sockets)
// ───────────────────────────────────────────────────────────────

/// Result of handing one buffer to the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The buffer is in flight; a `Sent` completion will follow.
    Accepted,
    /// Native buffers are exhausted; retry after `Sent` or `Writable`.
    TemporarilyFull,
    /// The socket cannot transmit any more.
    Failed(TransportError),
}

/// Non-blocking socket operations.  Completions are reported back through
/// [`NativeEvent`]s.
pub trait Transport {
    /// Start an outbound connect; `Connected` or `Error` follows.
    fn connect(&mut self, remote: Endpoint) -> core::result::Result<NativeHandle, TransportError>;

    /// Submit one buffer.  The native layer copies it before returning.
    fn send(&mut self, handle: NativeHandle, data: &[u8]) -> SendStatus;

    /// Request graceful teardown; `Disconnected` follows.
    fn disconnect(&mut self, handle: NativeHandle) -> core::result::Result<(), TransportError>;

    /// Tear down immediately.  No further events are reported for `handle`.
    fn abort(&mut self, handle: NativeHandle);

    /// Free the native socket object.  `handle` is invalid afterwards.
    fn release(&mut self, handle: NativeHandle);

    /// Stop delivering `Received` for `handle`.
    fn hold_recv(&mut self, handle: NativeHandle);

    /// Resume delivering `Received` for `handle`.
    fn unhold_recv(&mut self, handle: NativeHandle);

    /// Start accepting inbound connections on `port`; `Accepted` follows
    /// for each peer.
    fn listen(&mut self, port: u16) -> core::result::Result<(), TransportError>;

    /// Stop accepting.  Established sockets are unaffected.
    fn stop_listening(&mut self);
}

/// Completion reported by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEvent<'a> {
    /// An outbound connect completed.
    Connected { handle: NativeHandle, local: Endpoint },
    /// A peer connected to the listener.
    Accepted { handle: NativeHandle, local: Endpoint, remote: Endpoint },
    Received { handle: NativeHandle, data: &'a [u8] },
    /// The in-flight buffer was acknowledged.
    Sent { handle: NativeHandle },
    /// Native send buffers have room again.
    Writable { handle: NativeHandle },
    /// Teardown finished (either side initiated).
    Disconnected { handle: NativeHandle },
    /// The socket failed or was reset by the peer.
    Error { handle: NativeHandle },
}

// ───────────────────────────────────────────────────────────────
// Protocol core (driven: runtime → protocol engine)
// ───────────────────────────────────────────────────────────────

/// Transport-level lifecycle notifications for the protocol core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    /// Outbound connection established.
    Connected,
    /// Inbound connection accepted.
    ClientConnected,
    /// Outbound connection gone.
    Disconnected,
    /// Inbound connection gone.
    ClientDisconnected,
    /// Outbound connection through a network relay established.
    RelaySessionConnected,
}

/// Lifecycle of the network-relay control link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayControlSignal {
    Connected,
    /// The link never came up.
    ConnectFailed,
    Disconnected,
}

/// The peer protocol engine.
pub trait ProtocolCore {
    /// Free space in the receive buffer for `conn`.
    fn rx_buffer_free(&self, conn: ConnectionId) -> usize;

    /// Copy inbound bytes into the receive buffer.  Only called when the
    /// bytes fit.
    fn feed(&mut self, conn: ConnectionId, data: &[u8]);

    /// One processing pass over the receive buffer.
    fn process(&mut self, conn: ConnectionId, io: &mut dyn CoreIo);

    fn signal_transport_event(&mut self, conn: ConnectionId, signal: TransportSignal, io: &mut dyn CoreIo);

    /// A message relayed from an application context.
    fn receive_app_to_core(&mut self, session: &SessionId, data: &[u8], io: &mut dyn CoreIo);

    /// Lifecycle change of the relay control link.
    fn signal_relay_control(&mut self, signal: RelayControlSignal, io: &mut dyn CoreIo) {
        let _ = (signal, io);
    }

    /// Bytes from the relay control link.  Handed over as they arrive,
    /// without admission or receive hold.
    fn feed_relay_control(&mut self, data: &[u8], io: &mut dyn CoreIo) {
        let _ = (data, io);
    }
}

/// Operations the runtime exposes to the protocol core and applications.
///
/// Calls made through this trait never re-enter the caller: transport
/// signals they cause are delivered after the current callback returns.
pub trait CoreIo {
    fn open_connection(&mut self, remote: Endpoint, via_relay: bool) -> Result<ConnectionId>;

    fn close_connection(&mut self, conn: ConnectionId) -> Result<()>;

    fn send(&mut self, conn: ConnectionId, data: &[u8]) -> Result<SendOutcome>;

    fn relay_app_to_core(&mut self, session: SessionId, data: &[u8]) -> Result<()>;

    fn relay_core_to_app(&mut self, session: SessionId, data: &[u8]) -> Result<()>;

    /// Connect the single network-relay control link.
    fn open_relay_control(&mut self, remote: Endpoint) -> Result<()>;

    fn close_relay_control(&mut self) -> Result<()>;

    /// Transmit directly on the relay control link, bypassing flow control.
    fn send_relay_control(&mut self, data: &[u8]) -> Result<()>;

    /// Relative clock, in seconds since the runtime started.
    fn now_secs(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Application contexts
// ───────────────────────────────────────────────────────────────

/// A live application attached to the protocol core.
pub trait AppContext {
    fn receive_core_to_app(&mut self, data: &[u8], io: &mut dyn CoreIo);
}

/// Resolves a session identifier to its live application.
pub trait AppRegistry {
    fn app(&mut self, session: &SessionId) -> Option<&mut dyn AppContext>;
}
