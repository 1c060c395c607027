//! Host TCP transport adapter.
//!
//! Implements [`Transport`](crate::runtime::ports::Transport) on top of
//! non-blocking `std::net` sockets so the runtime can be driven against
//! real peers on a development machine.
//!
//! ## Connection model
//!
//! 1. `bind()` (or `listen()`) opens a non-blocking listener; port `0`
//!    lets the OS pick.
//! 2. [`poll()`](TcpTransport::poll) accepts clients, resolves outbound
//!    connects, flushes in-flight writes and reads sockets that are not
//!    held, yielding one [`PolledEvent`] at a time.  Feed each one to
//!    `Runtime::on_native`.
//! 3. At most one buffer per socket is in flight; a second `send` before
//!    the `Sent` completion reports `TemporarilyFull`.
//! 4. Accepted sockets idle past the inactivity timeout are closed.
//!
//! `std::net` has no non-blocking connect, so each outbound connect runs
//! on a short-lived helper thread bounded by [`CONNECT_TIMEOUT`].  The
//! caller gets its handle at once; `Connected` or `Error` arrives through
//! `poll()`.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::connection::{Endpoint, NativeHandle};
use crate::error::TransportError;
use crate::runtime::ports::{NativeEvent, SendStatus, Transport};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest single read handed to the runtime.
const READ_CHUNK: usize = 1460;

// ───────────────────────────────────────────────────────────────
// Polled events
// ───────────────────────────────────────────────────────────────

/// Owned form of [`NativeEvent`] so the transport can be borrowed
/// mutably while the event is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolledEvent {
    Connected { handle: NativeHandle, local: Endpoint },
    Accepted { handle: NativeHandle, local: Endpoint, remote: Endpoint },
    Received { handle: NativeHandle, data: Vec<u8> },
    Sent { handle: NativeHandle },
    Writable { handle: NativeHandle },
    Disconnected { handle: NativeHandle },
    Error { handle: NativeHandle },
}

impl PolledEvent {
    pub fn as_native(&self) -> NativeEvent<'_> {
        match self {
            Self::Connected { handle, local } => NativeEvent::Connected { handle: *handle, local: *local },
            Self::Accepted { handle, local, remote } => {
                NativeEvent::Accepted { handle: *handle, local: *local, remote: *remote }
            }
            Self::Received { handle, data } => NativeEvent::Received { handle: *handle, data },
            Self::Sent { handle } => NativeEvent::Sent { handle: *handle },
            Self::Writable { handle } => NativeEvent::Writable { handle: *handle },
            Self::Disconnected { handle } => NativeEvent::Disconnected { handle: *handle },
            Self::Error { handle } => NativeEvent::Error { handle: *handle },
        }
    }

    fn handle(&self) -> NativeHandle {
        match self {
            Self::Connected { handle, .. }
            | Self::Accepted { handle, .. }
            | Self::Received { handle, .. }
            | Self::Sent { handle }
            | Self::Writable { handle }
            | Self::Disconnected { handle }
            | Self::Error { handle } => *handle,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Socket bookkeeping
// ───────────────────────────────────────────────────────────────

struct Socket {
    stream: TcpStream,
    /// Unwritten tail of the buffer in flight.
    tx: Option<Vec<u8>>,
    /// Submitted buffer whose `Sent` has not been reported yet.
    unacked: bool,
    /// A send was refused; report `Writable` once the slot frees.
    want_writable: bool,
    held: bool,
    /// Teardown started; no more reads or writes.
    closed: bool,
    /// Came from the listener; subject to the inactivity timeout.
    inbound: bool,
    last_activity: Instant,
}

impl Socket {
    fn new(stream: TcpStream, inbound: bool) -> Self {
        Self {
            stream,
            inbound,
            tx: None,
            unacked: false,
            want_writable: false,
            held: false,
            closed: false,
            last_activity: Instant::now(),
        }
    }
}

fn endpoint(addr: SocketAddr) -> Endpoint {
    match addr {
        SocketAddr::V4(v4) => Endpoint::new(v4.ip().octets(), v4.port()),
        SocketAddr::V6(v6) => Endpoint { port: v6.port(), ..Endpoint::UNSPECIFIED },
    }
}

// ───────────────────────────────────────────────────────────────
// Transport
// ───────────────────────────────────────────────────────────────

type ConnectResult = (NativeHandle, io::Result<TcpStream>);

pub struct TcpTransport {
    listener: Option<TcpListener>,
    sockets: HashMap<NativeHandle, Socket>,
    pending: VecDeque<PolledEvent>,
    /// Outbound connects still running on a helper thread.
    connecting: Vec<NativeHandle>,
    connect_tx: Sender<ConnectResult>,
    connect_rx: Receiver<ConnectResult>,
    next_handle: u32,
    max_sockets: usize,
    nodelay: bool,
    inactivity: Duration,
}

impl TcpTransport {
    /// Listen on `0.0.0.0:<config.listen_port>` with the configured socket
    /// options.
    pub fn bind(config: &RuntimeConfig) -> Result<Self, TransportError> {
        let mut t = Self::unbound(config);
        t.listen(config.listen_port)?;
        Ok(t)
    }

    /// Transport without a listener; see [`Transport::listen`].
    pub fn unbound(config: &RuntimeConfig) -> Self {
        let (connect_tx, connect_rx) = mpsc::channel();
        Self {
            listener: None,
            sockets: HashMap::new(),
            pending: VecDeque::new(),
            connecting: Vec::new(),
            connect_tx,
            connect_rx,
            next_handle: 0,
            // One spare so the runtime sees, and rejects, an accept over its limit.
            max_sockets: config.max_connections + 1,
            nodelay: config.tcp_nodelay,
            inactivity: Duration::from_secs(u64::from(config.inactivity_timeout_secs)),
        }
    }

    /// Bound listener address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Next native completion, if any.
    pub fn poll(&mut self) -> Option<PolledEvent> {
        if self.pending.is_empty() {
            self.sweep();
        }
        let ev = self.pending.pop_front()?;
        if let PolledEvent::Sent { handle } = &ev {
            let handle = *handle;
            if let Some(sock) = self.sockets.get_mut(&handle) {
                sock.unacked = false;
                if sock.want_writable {
                    sock.want_writable = false;
                    self.pending.push_back(PolledEvent::Writable { handle });
                }
            }
        }
        Some(ev)
    }

    fn allocate_handle(&mut self) -> NativeHandle {
        self.next_handle = self.next_handle.wrapping_add(1);
        NativeHandle(self.next_handle)
    }

    fn adopt(&mut self, handle: NativeHandle, stream: TcpStream, inbound: bool) -> Result<(), TransportError> {
        stream.set_nonblocking(true).map_err(|_| TransportError::Io)?;
        if self.nodelay && stream.set_nodelay(true).is_err() {
            debug!("TCP(sim): could not set TCP_NODELAY");
        }
        self.sockets.insert(handle, Socket::new(stream, inbound));
        Ok(())
    }

    // ── Sweep ─────────────────────────────────────────────────

    fn sweep(&mut self) {
        self.accept_pending();
        self.resolve_connects();

        let now = Instant::now();
        let handles: Vec<NativeHandle> = self.sockets.keys().copied().collect();
        for handle in handles {
            let Some(sock) = self.sockets.get_mut(&handle) else {
                continue;
            };
            if sock.closed {
                continue;
            }
            if let Some(ev) = Self::flush(handle, sock) {
                self.pending.push_back(ev);
                continue;
            }
            if !sock.held {
                if let Some(ev) = Self::read(handle, sock) {
                    self.pending.push_back(ev);
                    continue;
                }
            }
            if sock.inbound && !self.inactivity.is_zero() && now.duration_since(sock.last_activity) > self.inactivity {
                info!("TCP(sim): {} idle for {:?}, closing", handle, self.inactivity);
                let _ = sock.stream.shutdown(Shutdown::Both);
                sock.closed = true;
                self.pending.push_back(PolledEvent::Disconnected { handle });
            }
        }
    }

    fn accept_pending(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let mut accepted = Vec::new();
        loop {
            match listener.accept() {
                Ok(pair) => accepted.push(pair),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("TCP(sim): accept error: {}", e);
                    break;
                }
            }
        }

        for (stream, addr) in accepted {
            if self.sockets.len() >= self.max_sockets {
                warn!("TCP(sim): refusing {} ({} sockets open)", addr, self.sockets.len());
                continue;
            }
            let local = stream.local_addr().map_or(Endpoint::UNSPECIFIED, endpoint);
            let handle = self.allocate_handle();
            if self.adopt(handle, stream, true).is_err() {
                warn!("TCP(sim): failed to configure socket from {}", addr);
                continue;
            }
            info!("TCP(sim): {} accepted from {}", handle, addr);
            self.pending.push_back(PolledEvent::Accepted { handle, local, remote: endpoint(addr) });
        }
    }

    /// Collect finished helper-thread connects.  Results for handles that
    /// were aborted meanwhile are dropped, closing the stream.
    fn resolve_connects(&mut self) {
        while let Ok((handle, result)) = self.connect_rx.try_recv() {
            let Some(pos) = self.connecting.iter().position(|h| *h == handle) else {
                debug!("TCP(sim): {} connect finished after abort", handle);
                continue;
            };
            self.connecting.swap_remove(pos);
            let ev = match result {
                Ok(stream) => {
                    let local = stream.local_addr().map_or(Endpoint::UNSPECIFIED, endpoint);
                    match self.adopt(handle, stream, false) {
                        Ok(()) => PolledEvent::Connected { handle, local },
                        Err(e) => {
                            warn!("TCP(sim): {} could not configure socket: {}", handle, e);
                            PolledEvent::Error { handle }
                        }
                    }
                }
                Err(e) => {
                    warn!("TCP(sim): {} connect failed: {}", handle, e);
                    PolledEvent::Error { handle }
                }
            };
            self.pending.push_back(ev);
        }
    }

    /// Push the in-flight tail; report `Sent` once it is fully written.
    fn flush(handle: NativeHandle, sock: &mut Socket) -> Option<PolledEvent> {
        let tx = sock.tx.as_mut()?;
        match sock.stream.write(tx) {
            Ok(n) => {
                tx.drain(..n);
                sock.last_activity = Instant::now();
                if tx.is_empty() {
                    sock.tx = None;
                    return Some(PolledEvent::Sent { handle });
                }
                None
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!("TCP(sim): {} write error: {}", handle, e);
                sock.closed = true;
                Some(PolledEvent::Error { handle })
            }
        }
    }

    fn read(handle: NativeHandle, sock: &mut Socket) -> Option<PolledEvent> {
        let mut buf = [0u8; READ_CHUNK];
        match sock.stream.read(&mut buf) {
            Ok(0) => {
                info!("TCP(sim): {} closed by peer", handle);
                sock.closed = true;
                Some(PolledEvent::Disconnected { handle })
            }
            Ok(n) => {
                sock.last_activity = Instant::now();
                Some(PolledEvent::Received { handle, data: buf[..n].to_vec() })
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!("TCP(sim): {} read error: {}", handle, e);
                sock.closed = true;
                Some(PolledEvent::Error { handle })
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, remote: Endpoint) -> Result<NativeHandle, TransportError> {
        let addr = SocketAddr::from((remote.ip, remote.port));
        let handle = self.allocate_handle();
        let tx = self.connect_tx.clone();
        thread::Builder::new()
            .name("tcp-connect".into())
            .spawn(move || {
                let _ = tx.send((handle, TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)));
            })
            .map_err(|e| {
                warn!("TCP(sim): cannot start connect to {}: {}", remote, e);
                TransportError::ConnectFailed
            })?;
        self.connecting.push(handle);
        debug!("TCP(sim): {} connecting to {}", handle, remote);
        Ok(handle)
    }

    fn send(&mut self, handle: NativeHandle, data: &[u8]) -> SendStatus {
        let Some(sock) = self.sockets.get_mut(&handle) else {
            return SendStatus::Failed(TransportError::InvalidHandle);
        };
        if sock.closed {
            return SendStatus::Failed(TransportError::SendFailed);
        }
        if sock.unacked {
            sock.want_writable = true;
            return SendStatus::TemporarilyFull;
        }
        sock.tx = Some(data.to_vec());
        sock.unacked = true;
        if let Some(ev) = Self::flush(handle, sock) {
            self.pending.push_back(ev);
        }
        SendStatus::Accepted
    }

    fn disconnect(&mut self, handle: NativeHandle) -> Result<(), TransportError> {
        let sock = self.sockets.get_mut(&handle).ok_or(TransportError::InvalidHandle)?;
        if sock.closed {
            return Ok(());
        }
        sock.closed = true;
        sock.stream.shutdown(Shutdown::Both).map_err(|_| TransportError::DisconnectFailed)?;
        self.pending.push_back(PolledEvent::Disconnected { handle });
        Ok(())
    }

    fn abort(&mut self, handle: NativeHandle) {
        self.connecting.retain(|h| *h != handle);
        if let Some(sock) = self.sockets.get_mut(&handle) {
            let _ = sock.stream.shutdown(Shutdown::Both);
            sock.closed = true;
        }
        self.pending.retain(|ev| ev.handle() != handle);
    }

    fn release(&mut self, handle: NativeHandle) {
        self.connecting.retain(|h| *h != handle);
        if self.sockets.remove(&handle).is_some() {
            debug!("TCP(sim): {} released", handle);
        }
        self.pending.retain(|ev| ev.handle() != handle);
    }

    fn hold_recv(&mut self, handle: NativeHandle) {
        if let Some(sock) = self.sockets.get_mut(&handle) {
            sock.held = true;
        }
    }

    fn unhold_recv(&mut self, handle: NativeHandle) {
        if let Some(sock) = self.sockets.get_mut(&handle) {
            sock.held = false;
        }
    }

    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        if self.listener.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).map_err(|e| {
            warn!("TCP(sim): bind to port {} failed: {}", port, e);
            TransportError::Io
        })?;
        listener.set_nonblocking(true).map_err(|_| TransportError::Io)?;
        info!("TCP(sim): listening on port {}", port);
        self.listener = Some(listener);
        Ok(())
    }

    fn stop_listening(&mut self) {
        if self.listener.take().is_some() {
            info!("TCP(sim): listener closed");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
