//! Fuzz target: arbitrary native/operation interleavings against `Runtime`
//!
//! Each input byte selects one operation (accept, send, completion,
//! receive, close, tick, native error, scheduler turn, ...).  The runtime
//! must never panic, never put two buffers in flight on one socket, and
//! never release a native handle twice.
//!
//! cargo fuzz run fuzz_outbound_ops

#![no_main]

use std::collections::HashMap;

use libfuzzer_sys::fuzz_target;
use peerlink::config::RuntimeConfig;
use peerlink::connection::{ConnectionId, Endpoint, NativeHandle};
use peerlink::error::TransportError;
use peerlink::events::EventQueue;
use peerlink::relay::SessionId;
use peerlink::runtime::Runtime;
use peerlink::runtime::ports::{
    AppContext, AppRegistry, CoreIo, NativeEvent, ProtocolCore, SendStatus, Transport, TransportSignal,
};

#[derive(Default)]
struct Wire {
    in_flight: HashMap<NativeHandle, u32>,
    released: Vec<NativeHandle>,
    full_for: u32,
    fail_next: bool,
}

impl Transport for Wire {
    fn connect(&mut self, _remote: Endpoint) -> Result<NativeHandle, TransportError> {
        Err(TransportError::ConnectFailed)
    }
    fn send(&mut self, handle: NativeHandle, _data: &[u8]) -> SendStatus {
        if self.fail_next {
            self.fail_next = false;
            return SendStatus::Failed(TransportError::SendFailed);
        }
        if self.full_for > 0 {
            self.full_for -= 1;
            return SendStatus::TemporarilyFull;
        }
        let n = self.in_flight.entry(handle).or_default();
        *n += 1;
        assert!(*n <= 1, "two buffers in flight on {handle}");
        SendStatus::Accepted
    }
    fn disconnect(&mut self, _handle: NativeHandle) -> Result<(), TransportError> {
        Ok(())
    }
    fn abort(&mut self, _handle: NativeHandle) {}
    fn release(&mut self, handle: NativeHandle) {
        assert!(!self.released.contains(&handle), "{handle} released twice");
        self.released.push(handle);
        self.in_flight.remove(&handle);
    }
    fn hold_recv(&mut self, _handle: NativeHandle) {}
    fn unhold_recv(&mut self, _handle: NativeHandle) {}
    fn listen(&mut self, _port: u16) -> Result<(), TransportError> {
        Ok(())
    }
    fn stop_listening(&mut self) {}
}

#[derive(Default)]
struct Core {
    buffered: HashMap<ConnectionId, usize>,
}

impl ProtocolCore for Core {
    fn rx_buffer_free(&self, conn: ConnectionId) -> usize {
        1500 - self.buffered.get(&conn).copied().unwrap_or(0)
    }
    fn feed(&mut self, conn: ConnectionId, data: &[u8]) {
        *self.buffered.entry(conn).or_default() += data.len();
    }
    fn process(&mut self, conn: ConnectionId, io: &mut dyn CoreIo) {
        let b = self.buffered.entry(conn).or_default();
        let n = (*b).min(300);
        *b -= n;
        if n > 0 {
            let _ = io.send(conn, &vec![0u8; n]);
        }
    }
    fn signal_transport_event(&mut self, conn: ConnectionId, signal: TransportSignal, _io: &mut dyn CoreIo) {
        if matches!(signal, TransportSignal::ClientDisconnected) {
            self.buffered.remove(&conn);
        }
    }
    fn receive_app_to_core(&mut self, session: &SessionId, data: &[u8], io: &mut dyn CoreIo) {
        let _ = io.relay_core_to_app(*session, data);
    }
}

struct App;

impl AppContext for App {
    fn receive_core_to_app(&mut self, _data: &[u8], _io: &mut dyn CoreIo) {}
}

struct Apps(App);

impl AppRegistry for Apps {
    fn app(&mut self, session: &SessionId) -> Option<&mut dyn AppContext> {
        (session.0[0] == 0).then_some(&mut self.0 as &mut dyn AppContext)
    }
}

fuzz_target!(|data: &[u8]| {
    let q = EventQueue::new();
    let Ok(mut rt) = Runtime::new(RuntimeConfig::default(), &q) else {
        return;
    };
    let mut wire = Wire::default();
    let mut core = Core::default();
    let mut apps = Apps(App);
    let local = Endpoint::new([10, 0, 0, 1], 37008);
    let mut next_handle = 1u32;
    let mut now = 0u64;

    for &b in data {
        let arg = b >> 4;
        let handle = NativeHandle(u32::from(arg % 4) + next_handle.saturating_sub(4).max(1));
        match b & 0x0f {
            0 => {
                let h = NativeHandle(next_handle);
                next_handle += 1;
                let remote = Endpoint::new([10, 0, 0, 2], 1000u16.wrapping_add(next_handle as u16));
                rt.on_native(NativeEvent::Accepted { handle: h, local, remote }, &mut wire, &mut core);
            }
            1 | 2 => {
                let conn = ConnectionId(u16::from(arg % 4) + 1);
                let _ = rt.send(conn, &[b; 16], &mut wire);
            }
            3 => {
                if let Some(n) = wire.in_flight.get_mut(&handle) {
                    if *n > 0 {
                        *n -= 1;
                        rt.on_native(NativeEvent::Sent { handle }, &mut wire, &mut core);
                    }
                }
            }
            4 => rt.on_native(NativeEvent::Writable { handle }, &mut wire, &mut core),
            5 => wire.full_for = u32::from(arg % 3),
            6 => wire.fail_next = true,
            7 => {
                let chunk = vec![0u8; usize::from(arg) * 150];
                rt.on_native(NativeEvent::Received { handle, data: &chunk }, &mut wire, &mut core);
            }
            8 => {
                let conn = ConnectionId(u16::from(arg % 4) + 1);
                let _ = rt.close_connection(conn, &mut wire, &mut core);
            }
            9 => {
                now += u64::from(arg);
                rt.tick(now, &mut wire, &mut core);
            }
            10 => {
                if !wire.released.contains(&handle) {
                    rt.on_native(NativeEvent::Disconnected { handle }, &mut wire, &mut core);
                }
            }
            11 => {
                if !wire.released.contains(&handle) {
                    rt.on_native(NativeEvent::Error { handle }, &mut wire, &mut core);
                }
            }
            12 => {
                let mut session = [0u8; 32];
                session[0] = arg & 1;
                let _ = rt.send_app_to_core(SessionId(session), &[arg]);
            }
            _ => {
                rt.run_once(&mut wire, &mut core, &mut apps);
            }
        }
        assert!(rt.outbound_backlog() <= 3 * RuntimeConfig::default().max_outbound_depth);
    }
});
