//! The dispatch runtime.
//!
//! [`Runtime`] owns the connection table, both flow controllers and the
//! cross-context relay, and borrows the interrupt-facing [`EventQueue`].
//! It has three kinds of entry point, all called from the same cooperative
//! context:
//!
//! ```text
//!   native callbacks ──▶ on_native ─┐
//!   scheduler task   ──▶ run_once  ─┼──▶ NetState ──▶ Transport
//!   coarse timer     ──▶ tick      ─┘        │
//!                                            └──▶ ProtocolCore / AppRegistry
//! ```
//!
//! Collaborators are passed in per call, never stored.  Transport signals
//! produced while a collaborator is running are queued and delivered to
//! the protocol core after it returns, so no callback re-enters its caller.

mod control_link;
pub mod ports;

use std::collections::VecDeque;

use log::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::connection::{
    Connection, ConnectionId, ConnectionState, ConnectionTable, Endpoint, NativeHandle, Origin,
};
use crate::diagnostics::RuntimeStats;
use crate::error::{Error, RelayError, Result, TransportError};
use crate::events::{Event, EventKind, EventQueue, Raised, RetryList};
use crate::flow::{AdmissionController, OutboundController, SendOutcome};
use crate::relay::{CrossContextEvent, CrossContextRelay, RelayDirection, RelayStep, SessionId};
use crate::scheduler::{EventHandler, Scheduler};

pub use self::control_link::LinkState;

use self::control_link::ControlLink;
use self::ports::{
    AppRegistry, CoreIo, NativeEvent, ProtocolCore, RelayControlSignal, SendStatus, Transport, TransportSignal,
};

pub struct Runtime<'q> {
    scheduler: Scheduler,
    net: NetState<'q>,
}

/// Everything mutated by native callbacks and scheduler turns.
struct NetState<'q> {
    config: RuntimeConfig,
    events: &'q EventQueue,
    connections: ConnectionTable,
    outbound: OutboundController,
    admission: AdmissionController,
    relay: CrossContextRelay,
    /// Signals waiting for the protocol core to become free.
    signals: VecDeque<(ConnectionId, TransportSignal)>,
    relay_ctl: Option<ControlLink>,
    relay_ctl_signals: VecDeque<RelayControlSignal>,
    /// Native handles without a connection whose release is still owed.
    detached: Vec<NativeHandle>,
    /// Teardown events for detached handles that found the queue full.
    native_retry: RetryList,
    now_secs: u64,
    last_stats_log: u64,
    forced_reclaims: u32,
}

impl<'q> Runtime<'q> {
    pub fn new(config: RuntimeConfig, events: &'q EventQueue) -> Result<Self> {
        config.validate()?;
        info!(
            "Runtime: rx buffer {} B, {} connections, {}s close grace, drain budget {}",
            config.rx_buffer_size, config.max_connections, config.close_grace_secs, config.drain_budget
        );
        Ok(Self {
            scheduler: Scheduler::new(config.drain_budget),
            net: NetState {
                connections: ConnectionTable::new(config.max_connections),
                outbound: OutboundController::new(config.max_outbound_depth),
                admission: AdmissionController::new(config.rx_buffer_size),
                relay: CrossContextRelay::new(config.relay_queue_depth),
                signals: VecDeque::new(),
                relay_ctl: None,
                relay_ctl_signals: VecDeque::new(),
                detached: Vec::new(),
                native_retry: RetryList::new(),
                events,
                now_secs: 0,
                last_stats_log: 0,
                forced_reclaims: 0,
                config,
            },
        })
    }

    // ── Scheduler task ──────────────────────────────────────────

    /// Run one scheduler turn and, if scheduled, one relay turn.
    ///
    /// Returns `true` while work remains; the embedding task re-posts
    /// itself until this returns `false`.
    pub fn run_once<T, C, A>(&mut self, transport: &mut T, core: &mut C, apps: &mut A) -> bool
    where
        T: Transport + ?Sized,
        C: ProtocolCore + ?Sized,
        A: AppRegistry + ?Sized,
    {
        let events = self.net.events;
        let mut dispatcher = Dispatcher { net: &mut self.net, transport: &mut *transport, core: &mut *core };
        self.scheduler.dispatch_once(events, &mut dispatcher);
        self.net.flush_retries();
        self.net.flush_signals(transport, core);

        if self.net.relay.turn_pending() {
            self.net.relay_turn(transport, core, apps);
            self.net.flush_signals(transport, core);
        }
        events.turn_pending() || self.net.relay.turn_pending() || self.net.has_parked()
    }

    // ── Native callbacks ────────────────────────────────────────

    /// Entry point for every native socket completion.
    pub fn on_native<T, C>(&mut self, event: NativeEvent<'_>, transport: &mut T, core: &mut C)
    where
        T: Transport + ?Sized,
        C: ProtocolCore + ?Sized,
    {
        match event {
            NativeEvent::Connected { handle, local } => self.net.on_connected(handle, local),
            NativeEvent::Accepted { handle, local, remote } => self.net.on_accepted(handle, local, remote, transport),
            NativeEvent::Received { handle, data } => self.net.on_received(handle, data, core, transport),
            NativeEvent::Sent { handle } => self.net.on_sent(handle, transport),
            NativeEvent::Writable { handle } => self.net.on_writable(handle, transport),
            NativeEvent::Disconnected { handle } => self.net.on_disconnected(handle, transport),
            NativeEvent::Error { handle } => self.net.on_error(handle, transport),
        }
        self.net.flush_signals(transport, core);
    }

    // ── Timer ───────────────────────────────────────────────────

    /// Advance the relative clock, reclaim connections whose close grace
    /// elapsed and emit the periodic statistics line.
    pub fn tick<T, C>(&mut self, now_secs: u64, transport: &mut T, core: &mut C)
    where
        T: Transport + ?Sized,
        C: ProtocolCore + ?Sized,
    {
        self.net.now_secs = self.net.now_secs.max(now_secs);
        for conn in self.net.connections.closing() {
            self.net.check_grace(conn, transport);
        }
        self.net.flush_retries();
        self.log_stats_if_due();
        self.net.flush_signals(transport, core);
    }

    fn log_stats_if_due(&mut self) {
        let interval = u64::from(self.net.config.stats_log_interval_secs);
        if interval == 0 || self.net.now_secs.saturating_sub(self.net.last_stats_log) < interval {
            return;
        }
        self.net.last_stats_log = self.net.now_secs;
        let s = self.stats();
        info!(
            "Runtime: up {}s | conns {} | backlog {} | events {}/{} dropped | sends {} | rejected rx {} | reclaims {}",
            s.uptime_secs,
            s.connections,
            s.outbound_backlog,
            s.events_dropped,
            s.events_queued,
            s.flow.sends_submitted,
            s.admission.rejected,
            s.forced_reclaims
        );
    }

    // ── Direct operations ───────────────────────────────────────

    pub fn open_connection<T: Transport + ?Sized>(
        &mut self,
        remote: Endpoint,
        via_relay: bool,
        transport: &mut T,
    ) -> Result<ConnectionId> {
        self.net.open_connection(remote, via_relay, transport)
    }

    pub fn close_connection<T, C>(&mut self, conn: ConnectionId, transport: &mut T, core: &mut C) -> Result<()>
    where
        T: Transport + ?Sized,
        C: ProtocolCore + ?Sized,
    {
        let res = self.net.close_connection(conn, transport);
        self.net.flush_signals(transport, core);
        res
    }

    pub fn send<T: Transport + ?Sized>(&mut self, conn: ConnectionId, data: &[u8], transport: &mut T) -> Result<SendOutcome> {
        self.net.send(conn, data, transport)
    }

    // ── Listener ────────────────────────────────────────────────

    /// Accept inbound peers on the configured listen port.
    pub fn start_server<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        let port = self.net.config.listen_port;
        transport.listen(port).inspect_err(|e| warn!("Conn: cannot listen on port {}: {}", port, e))?;
        info!("Conn: accepting peers on port {}", port);
        Ok(())
    }

    pub fn stop_server<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        transport.stop_listening();
        info!("Conn: no longer accepting peers");
    }

    // ── Relay control link ──────────────────────────────────────

    pub fn open_relay_control<T: Transport + ?Sized>(&mut self, remote: Endpoint, transport: &mut T) -> Result<()> {
        self.net.open_relay_control(remote, transport)
    }

    pub fn close_relay_control<T, C>(&mut self, transport: &mut T, core: &mut C) -> Result<()>
    where
        T: Transport + ?Sized,
        C: ProtocolCore + ?Sized,
    {
        let res = self.net.close_relay_control(transport);
        self.net.flush_signals(transport, core);
        res
    }

    pub fn send_relay_control<T: Transport + ?Sized>(&mut self, data: &[u8], transport: &mut T) -> Result<()> {
        self.net.send_relay_control(data, transport)
    }

    pub fn relay_control_state(&self) -> Option<LinkState> {
        self.net.relay_ctl.map(|link| link.state)
    }

    // ── Cross-context relay ─────────────────────────────────────

    pub fn send_app_to_core(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        self.net.relay.send_app_to_core(session, data)
    }

    pub fn send_core_to_app(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        self.net.relay.send_core_to_app(session, data)
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Resolve a native 4-tuple to its connection.
    pub fn identify(&self, remote: Endpoint, local: Endpoint) -> Option<ConnectionId> {
        self.net.connections.identify(remote, local)
    }

    pub fn connection(&self, conn: ConnectionId) -> Option<&Connection> {
        self.net.connections.get(conn)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.net.connections.iter()
    }

    pub fn outbound_backlog(&self) -> usize {
        self.net.outbound.backlog()
    }

    pub fn queued(&self, conn: ConnectionId) -> usize {
        self.net.outbound.queued(conn)
    }

    pub fn is_busy(&self, conn: ConnectionId) -> bool {
        self.net.outbound.is_busy(conn)
    }

    pub fn relay_len(&self) -> usize {
        self.net.relay.len()
    }

    pub fn events(&self) -> &'q EventQueue {
        self.net.events
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.net.config
    }

    pub fn now_secs(&self) -> u64 {
        self.net.now_secs
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            uptime_secs: self.net.now_secs,
            connections: self.net.connections.len() as u32,
            outbound_backlog: self.net.outbound.backlog() as u32,
            events_queued: self.net.events.queued_count(),
            events_dropped: self.net.events.dropped_count(),
            events_deferred: self.scheduler.deferrals(),
            turns: self.scheduler.turns(),
            forced_reclaims: self.net.forced_reclaims,
            flow: self.net.outbound.stats(),
            admission: self.net.admission.stats(),
            relay: self.net.relay.stats(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Connection lifecycle
// ═══════════════════════════════════════════════════════════════

impl NetState<'_> {
    fn open_connection<T: Transport + ?Sized>(
        &mut self,
        remote: Endpoint,
        via_relay: bool,
        transport: &mut T,
    ) -> Result<ConnectionId> {
        let conn = self.connections.insert_outbound(remote, via_relay).inspect_err(|e| {
            warn!("Conn: cannot open {}: {}", remote, e);
        })?;
        match transport.connect(remote) {
            Ok(handle) => {
                if let Some(c) = self.connections.get_mut(conn) {
                    c.set_handle(handle);
                }
                info!("Conn: {} connecting to {}{}", conn, remote, if via_relay { " (relay)" } else { "" });
                Ok(conn)
            }
            Err(e) => {
                self.connections.remove(conn);
                warn!("Conn: connect to {} failed: {}", remote, e);
                Err(e.into())
            }
        }
    }

    /// Begin closing `conn`.  Connections that never got a working socket
    /// are discarded at once; a repeated close re-checks the grace period.
    fn close_connection<T: Transport + ?Sized>(&mut self, conn: ConnectionId, transport: &mut T) -> Result<()> {
        let now = self.now_secs;
        let Some(c) = self.connections.get_mut(conn) else {
            debug!("Conn: close of unknown {}", conn);
            return Ok(());
        };
        match (c.state(), c.handle()) {
            (ConnectionState::Connected, Some(handle)) => {
                c.begin_closing(now)?;
                info!("Conn: {} closing", conn);
                if let Err(e) = transport.disconnect(handle) {
                    warn!("Conn: {} disconnect request failed: {}", conn, e);
                }
                Ok(())
            }
            (ConnectionState::Closing, handle) => {
                if !self.check_grace(conn, transport) {
                    if let Some(handle) = handle {
                        debug!("Conn: {} still closing, repeating disconnect", conn);
                        if let Err(e) = transport.disconnect(handle) {
                            warn!("Conn: {} disconnect request failed: {}", conn, e);
                        }
                    }
                }
                Ok(())
            }
            (ConnectionState::Disconnected, _) => Ok(()),
            _ => {
                debug!("Conn: {} never established, discarding", conn);
                self.teardown(conn, transport);
                Ok(())
            }
        }
    }

    /// Force reclamation once the close grace period has elapsed.
    fn check_grace<T: Transport + ?Sized>(&mut self, conn: ConnectionId, transport: &mut T) -> bool {
        let Some(started) = self.connections.get(conn).and_then(Connection::close_started) else {
            return false;
        };
        let grace = u64::from(self.config.close_grace_secs);
        if self.now_secs.saturating_sub(started) < grace {
            return false;
        }
        warn!("Conn: {} teardown not confirmed within {}s, reclaiming", conn, grace);
        self.forced_reclaims += 1;
        self.teardown(conn, transport);
        true
    }

    /// Abort and free the native socket, then destroy the connection.
    fn teardown<T: Transport + ?Sized>(&mut self, conn: ConnectionId, transport: &mut T) {
        let Some(handle) = self.connections.get(conn).map(Connection::handle) else {
            return;
        };
        if let Some(handle) = handle {
            transport.abort(handle);
            transport.release(handle);
        }
        self.destroy(conn);
    }

    /// Invalidate the outbound record, remove the connection and queue the
    /// matching disconnect signal.
    fn destroy(&mut self, conn: ConnectionId) -> Option<Connection> {
        let freed = self.outbound.remove(conn);
        self.admission.forget(conn);
        let mut c = self.connections.remove(conn)?;
        if let Err(e) = c.transition(ConnectionState::Disconnected) {
            error!("Conn: {} {}", conn, e);
        }
        let signal = match c.origin() {
            Origin::Outbound => TransportSignal::Disconnected,
            Origin::Inbound => TransportSignal::ClientDisconnected,
        };
        self.signals.push_back((conn, signal));
        info!("Conn: {} disconnected, {} queued buffers discarded", conn, freed);
        Some(c)
    }

    fn send<T: Transport + ?Sized>(&mut self, conn: ConnectionId, data: &[u8], transport: &mut T) -> Result<SendOutcome> {
        self.outbound.enqueue_send(conn, data, transport, self.events)
    }

    /// Hand `handle` to the event queue for teardown once the current
    /// callback has returned.  If even the retry list is full, tear it
    /// down right away.
    fn detach<T: Transport + ?Sized>(&mut self, kind: EventKind, handle: NativeHandle, transport: &mut T) {
        if !self.detached.contains(&handle) {
            self.detached.push(handle);
        }
        let event = match kind {
            EventKind::ConnectionAbort => Event::abort_native(handle),
            _ => Event::closing_native(handle),
        };
        if self.native_retry.raise(self.events, event) == Raised::Lost {
            self.release_native(kind, handle, transport);
        }
    }

    /// Dispose of a native handle that has no connection record.  Each
    /// detached handle is released once; later requests are no-ops.
    fn release_native<T: Transport + ?Sized>(&mut self, kind: EventKind, handle: NativeHandle, transport: &mut T) {
        let Some(pos) = self.detached.iter().position(|h| *h == handle) else {
            debug!("Conn: {} already released", handle);
            return;
        };
        self.detached.swap_remove(pos);
        match kind {
            EventKind::ConnectionClosing => {
                if let Err(e) = transport.disconnect(handle) {
                    debug!("Conn: disconnect of bare {} failed: {}", handle, e);
                }
                transport.release(handle);
            }
            EventKind::ConnectionAbort => {
                transport.abort(handle);
                transport.release(handle);
            }
            EventKind::NewData => {}
        }
    }

    // ── Native completions ──────────────────────────────────────

    fn on_connected(&mut self, handle: NativeHandle, local: Endpoint) {
        if let Some(link) = self.relay_ctl.as_mut().filter(|l| l.handle == handle) {
            if link.state == LinkState::Connecting {
                link.state = LinkState::Connected;
                info!("Relay: control link to {} established", link.remote);
                self.relay_ctl_signals.push_back(RelayControlSignal::Connected);
            }
            return;
        }
        let Some(conn) = self.connections.by_handle(handle) else {
            debug!("Conn: connect completion for unknown {}", handle);
            return;
        };
        let Some(c) = self.connections.get_mut(conn) else {
            return;
        };
        if let Err(e) = c.transition(ConnectionState::Connected) {
            warn!("Conn: {} ignoring connect completion: {}", conn, e);
            return;
        }
        c.set_local(local);
        let signal = if c.via_relay() {
            TransportSignal::RelaySessionConnected
        } else {
            TransportSignal::Connected
        };
        info!("Conn: {} connected {} -> {}", conn, local, c.remote());
        if let Err(e) = self.outbound.register(conn, handle) {
            error!("Conn: {} {}", conn, e);
        }
        self.signals.push_back((conn, signal));
    }

    fn on_accepted<T: Transport + ?Sized>(&mut self, handle: NativeHandle, local: Endpoint, remote: Endpoint, transport: &mut T) {
        let conn = match self.connections.insert_inbound(handle, local, remote) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Conn: rejecting {} from {}: {}", handle, remote, e);
                self.detach(EventKind::ConnectionClosing, handle, transport);
                return;
            }
        };
        if let Err(e) = self.outbound.register(conn, handle) {
            error!("Conn: {} {}", conn, e);
            self.connections.remove(conn);
            self.detach(EventKind::ConnectionClosing, handle, transport);
            return;
        }
        info!("Conn: {} accepted from {}", conn, remote);
        self.signals.push_back((conn, TransportSignal::ClientConnected));
    }

    fn on_received<C, T>(&mut self, handle: NativeHandle, data: &[u8], core: &mut C, transport: &mut T)
    where
        C: ProtocolCore + ?Sized,
        T: Transport + ?Sized,
    {
        if self.relay_ctl.is_some_and(|l| l.handle == handle) {
            let mut io = Io { net: self, transport };
            core.feed_relay_control(data, &mut io);
            return;
        }
        let Some(conn) = self.connections.by_handle(handle) else {
            debug!("Conn: {} bytes for unknown {}", data.len(), handle);
            return;
        };
        let Ok(held) = self.admission.admit(conn, handle, data, core, transport, self.events) else {
            return;
        };
        if let Some(c) = self.connections.get_mut(conn) {
            c.set_rx_held(held);
        }
    }

    fn on_sent<T: Transport + ?Sized>(&mut self, handle: NativeHandle, transport: &mut T) {
        let Some(conn) = self.connections.by_handle(handle) else {
            debug!("Conn: send completion for unknown {}", handle);
            return;
        };
        let _ = self.outbound.on_send_complete(conn, transport, self.events);
    }

    fn on_writable<T: Transport + ?Sized>(&mut self, handle: NativeHandle, transport: &mut T) {
        if let Some(conn) = self.connections.by_handle(handle) {
            self.outbound.on_writable(conn, transport, self.events);
        }
    }

    fn on_disconnected<T: Transport + ?Sized>(&mut self, handle: NativeHandle, transport: &mut T) {
        if let Some(link) = self.take_relay_control(handle) {
            info!("Relay: control link to {} closed", link.remote);
            transport.release(handle);
            return;
        }
        if let Some(pos) = self.detached.iter().position(|h| *h == handle) {
            // Native teardown finished before the queued event ran.
            self.detached.swap_remove(pos);
            transport.release(handle);
            return;
        }
        let Some(conn) = self.connections.by_handle(handle) else {
            debug!("Conn: late disconnect for {}", handle);
            return;
        };
        self.destroy(conn);
        transport.release(handle);
    }

    fn on_error<T: Transport + ?Sized>(&mut self, handle: NativeHandle, transport: &mut T) {
        if let Some(link) = self.take_relay_control(handle) {
            warn!("Relay: control link to {} failed", link.remote);
            self.detach(EventKind::ConnectionAbort, handle, transport);
            return;
        }
        let Some(conn) = self.connections.by_handle(handle) else {
            debug!("Conn: error for unknown {}", handle);
            return;
        };
        warn!("Conn: {} native error", conn);
        self.detach(EventKind::ConnectionAbort, handle, transport);
        self.destroy(conn);
    }

    // ── Relay control link ──────────────────────────────────────

    fn open_relay_control<T: Transport + ?Sized>(&mut self, remote: Endpoint, transport: &mut T) -> Result<()> {
        if self.relay_ctl.is_some() {
            return Err(TransportError::AlreadyOpen.into());
        }
        let handle = transport.connect(remote).inspect_err(|e| {
            warn!("Relay: control link to {} failed to start: {}", remote, e);
        })?;
        info!("Relay: opening control link to {}", remote);
        self.relay_ctl = Some(ControlLink::new(handle, remote));
        Ok(())
    }

    fn close_relay_control<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        let Some(link) = self.relay_ctl.as_mut() else {
            return Ok(());
        };
        let handle = link.handle;
        match transport.disconnect(handle) {
            Ok(()) => {
                link.state = LinkState::Closing;
                debug!("Relay: control link closing");
                Ok(())
            }
            Err(e) => {
                // Never got going; there is nothing to wait for.
                debug!("Relay: control link disconnect failed ({}), discarding", e);
                self.take_relay_control(handle);
                transport.abort(handle);
                transport.release(handle);
                Ok(())
            }
        }
    }

    fn send_relay_control<T: Transport + ?Sized>(&mut self, data: &[u8], transport: &mut T) -> Result<()> {
        let handle = match self.relay_ctl {
            Some(link) if link.state == LinkState::Connected => link.handle,
            _ => return Err(TransportError::NotOpen.into()),
        };
        match transport.send(handle, data) {
            SendStatus::Accepted => Ok(()),
            SendStatus::TemporarilyFull => Err(TransportError::Busy.into()),
            SendStatus::Failed(e) => {
                warn!("Relay: control link send failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Drop the control link if it owns `handle`, queueing the signal
    /// that matches how far it got.
    fn take_relay_control(&mut self, handle: NativeHandle) -> Option<ControlLink> {
        let link = self.relay_ctl.filter(|l| l.handle == handle)?;
        self.relay_ctl = None;
        let signal = match link.state {
            LinkState::Connecting => RelayControlSignal::ConnectFailed,
            LinkState::Connected | LinkState::Closing => RelayControlSignal::Disconnected,
        };
        self.relay_ctl_signals.push_back(signal);
        Some(link)
    }

    // ── Deferred delivery ───────────────────────────────────────

    /// Re-offer events that found the queue full.
    fn flush_retries(&mut self) {
        self.native_retry.flush(self.events);
        self.admission.flush_retries(self.events);
        self.outbound.flush_retries(self.events);
    }

    fn has_parked(&self) -> bool {
        !self.native_retry.is_empty() || self.admission.parked() > 0 || self.outbound.parked() > 0
    }

    fn flush_signals<T, C>(&mut self, transport: &mut T, core: &mut C)
    where
        T: Transport + ?Sized,
        C: ProtocolCore + ?Sized,
    {
        while let Some((conn, signal)) = self.signals.pop_front() {
            debug!("Conn: {} signal {:?}", conn, signal);
            let mut io = Io { net: self, transport: &mut *transport };
            core.signal_transport_event(conn, signal, &mut io);
        }
        while let Some(signal) = self.relay_ctl_signals.pop_front() {
            debug!("Relay: control link signal {:?}", signal);
            let mut io = Io { net: self, transport: &mut *transport };
            core.signal_relay_control(signal, &mut io);
        }
    }

    /// One relay turn: deliver the head unless outbound data is pending.
    fn relay_turn<T, C, A>(&mut self, transport: &mut T, core: &mut C, apps: &mut A)
    where
        T: Transport + ?Sized,
        C: ProtocolCore + ?Sized,
        A: AppRegistry + ?Sized,
    {
        let ev = match self.relay.take_ready(self.outbound.backlog()) {
            RelayStep::Ready(ev) => ev,
            RelayStep::Idle | RelayStep::Deferred => return,
        };
        let mut io = Io { net: &mut *self, transport };
        let delivered = match Self::deliver(&ev, &mut io, core, apps) {
            Ok(()) => true,
            Err(e) => {
                warn!("Relay: dropping {:?} for session {}: {}", ev.direction, ev.session, e);
                false
            }
        };
        self.relay.finish(delivered);
    }

    fn deliver<C, A>(ev: &CrossContextEvent, io: &mut dyn CoreIo, core: &mut C, apps: &mut A) -> Result<()>
    where
        C: ProtocolCore + ?Sized,
        A: AppRegistry + ?Sized,
    {
        let app = apps.app(&ev.session).ok_or(Error::Relay(RelayError::UnknownSession))?;
        match ev.direction {
            RelayDirection::AppToCore => core.receive_app_to_core(&ev.session, &ev.payload, io),
            RelayDirection::CoreToApp => app.receive_core_to_app(&ev.payload, io),
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Collaborator views
// ═══════════════════════════════════════════════════════════════

/// [`CoreIo`] handed to the protocol core and applications.
struct Io<'a, 'q, T: ?Sized> {
    net: &'a mut NetState<'q>,
    transport: &'a mut T,
}

impl<T: Transport + ?Sized> CoreIo for Io<'_, '_, T> {
    fn open_connection(&mut self, remote: Endpoint, via_relay: bool) -> Result<ConnectionId> {
        self.net.open_connection(remote, via_relay, &mut *self.transport)
    }

    fn close_connection(&mut self, conn: ConnectionId) -> Result<()> {
        self.net.close_connection(conn, &mut *self.transport)
    }

    fn send(&mut self, conn: ConnectionId, data: &[u8]) -> Result<SendOutcome> {
        self.net.send(conn, data, &mut *self.transport)
    }

    fn relay_app_to_core(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        self.net.relay.send_app_to_core(session, data)
    }

    fn relay_core_to_app(&mut self, session: SessionId, data: &[u8]) -> Result<()> {
        self.net.relay.send_core_to_app(session, data)
    }

    fn open_relay_control(&mut self, remote: Endpoint) -> Result<()> {
        self.net.open_relay_control(remote, &mut *self.transport)
    }

    fn close_relay_control(&mut self) -> Result<()> {
        self.net.close_relay_control(&mut *self.transport)
    }

    fn send_relay_control(&mut self, data: &[u8]) -> Result<()> {
        self.net.send_relay_control(data, &mut *self.transport)
    }

    fn now_secs(&self) -> u64 {
        self.net.now_secs
    }
}

/// [`EventHandler`] binding for one scheduler turn.
struct Dispatcher<'a, 'q, T: ?Sized, C: ?Sized> {
    net: &'a mut NetState<'q>,
    transport: &'a mut T,
    core: &'a mut C,
}

impl<T, C> EventHandler for Dispatcher<'_, '_, T, C>
where
    T: Transport + ?Sized,
    C: ProtocolCore + ?Sized,
{
    fn outbound_backlog(&self) -> usize {
        self.net.outbound.backlog()
    }

    fn is_connected(&self, conn: ConnectionId) -> bool {
        self.net
            .connections
            .get(conn)
            .is_some_and(|c| c.state() == ConnectionState::Connected)
    }

    fn has_buffered_input(&self, conn: ConnectionId) -> bool {
        self.core.rx_buffer_free(conn) < self.net.admission.rx_buffer_size()
    }

    fn process_input(&mut self, conn: ConnectionId) {
        let mut io = Io { net: &mut *self.net, transport: &mut *self.transport };
        self.core.process(conn, &mut io);
    }

    fn release_hold(&mut self, conn: ConnectionId) {
        let Some(c) = self.net.connections.get_mut(conn) else {
            return;
        };
        if !c.is_rx_held() {
            return;
        }
        c.set_rx_held(false);
        if let Some(handle) = c.handle() {
            self.transport.unhold_recv(handle);
        }
    }

    fn close(&mut self, conn: ConnectionId) {
        if let Err(e) = self.net.close_connection(conn, &mut *self.transport) {
            warn!("Conn: {} close failed: {}", conn, e);
        }
    }

    fn abort(&mut self, conn: ConnectionId) {
        self.net.teardown(conn, &mut *self.transport);
    }

    fn release_native(&mut self, kind: EventKind, handle: NativeHandle) {
        self.net.release_native(kind, handle, &mut *self.transport);
    }
}
