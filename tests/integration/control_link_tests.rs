//! Network-relay control link and listener start/stop.

use peerlink::config::{DEFAULT_LISTEN_PORT, RuntimeConfig};
use peerlink::connection::{Endpoint, NativeHandle};
use peerlink::error::{Error, TransportError};
use peerlink::events::EventQueue;
use peerlink::runtime::LinkState;
use peerlink::runtime::ports::{NativeEvent, RelayControlSignal};

use crate::harness::{Harness, LOCAL};

const RELAY: Endpoint = Endpoint::new([52, 1, 2, 3], 40000);

fn open(h: &mut Harness<'_>) -> NativeHandle {
    h.rt.open_relay_control(RELAY, &mut h.tx).unwrap();
    h.tx.connects.last().unwrap().1
}

fn open_connected(h: &mut Harness<'_>) -> NativeHandle {
    let handle = open(h);
    h.native(NativeEvent::Connected { handle, local: LOCAL });
    handle
}

// ── Control link ──────────────────────────────────────────────

#[test]
fn control_link_connects_and_signals_the_core() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);

    let handle = open(&mut h);
    assert_eq!(h.rt.relay_control_state(), Some(LinkState::Connecting));
    assert_eq!(h.tx.connects, vec![(RELAY, handle)]);

    h.native(NativeEvent::Connected { handle, local: LOCAL });
    assert_eq!(h.rt.relay_control_state(), Some(LinkState::Connected));
    assert_eq!(h.core.ctl_signals, vec![RelayControlSignal::Connected]);
    assert_eq!(h.rt.connections().count(), 0);
}

#[test]
fn control_link_bytes_bypass_admission() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let handle = open_connected(&mut h);

    h.receive(handle, b"relay hello");
    assert_eq!(h.core.ctl_fed, b"relay hello".to_vec());
    assert!(h.tx.holds.is_empty());
    assert!(q.is_empty());
    assert_eq!(h.rt.stats().admission.admitted, 0);
}

#[test]
fn control_link_send_requires_an_open_link() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    assert_eq!(
        h.rt.send_relay_control(b"early", &mut h.tx),
        Err(Error::Transport(TransportError::NotOpen))
    );

    let handle = open(&mut h);
    assert_eq!(
        h.rt.send_relay_control(b"early", &mut h.tx),
        Err(Error::Transport(TransportError::NotOpen))
    );

    h.native(NativeEvent::Connected { handle, local: LOCAL });
    h.rt.send_relay_control(b"ping", &mut h.tx).unwrap();
    assert_eq!(h.tx.payloads(handle), vec![b"ping".to_vec()]);
    assert_eq!(h.rt.outbound_backlog(), 0);

    h.tx.full_for = 1;
    assert_eq!(
        h.rt.send_relay_control(b"later", &mut h.tx),
        Err(Error::Transport(TransportError::Busy))
    );
}

#[test]
fn control_link_close_waits_for_native_confirmation() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let handle = open_connected(&mut h);

    h.rt.close_relay_control(&mut h.tx, &mut h.core).unwrap();
    assert_eq!(h.rt.relay_control_state(), Some(LinkState::Closing));
    assert_eq!(h.tx.disconnects, vec![handle]);
    assert!(h.tx.releases.is_empty());

    h.native(NativeEvent::Disconnected { handle });
    assert_eq!(h.rt.relay_control_state(), None);
    assert_eq!(h.tx.releases, vec![handle]);
    assert_eq!(
        h.core.ctl_signals,
        vec![RelayControlSignal::Connected, RelayControlSignal::Disconnected]
    );
}

#[test]
fn control_link_close_discards_when_disconnect_is_refused() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let handle = open_connected(&mut h);
    h.tx.fail_disconnect = true;

    h.rt.close_relay_control(&mut h.tx, &mut h.core).unwrap();
    assert_eq!(h.rt.relay_control_state(), None);
    assert_eq!(h.tx.aborts, vec![handle]);
    assert_eq!(h.tx.releases, vec![handle]);
    assert_eq!(
        h.core.ctl_signals,
        vec![RelayControlSignal::Connected, RelayControlSignal::Disconnected]
    );

    // Closing again is harmless.
    h.rt.close_relay_control(&mut h.tx, &mut h.core).unwrap();
    assert_eq!(h.tx.releases, vec![handle]);
}

#[test]
fn control_link_connect_failure_is_reported() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let handle = open(&mut h);

    h.native(NativeEvent::Error { handle });
    assert_eq!(h.rt.relay_control_state(), None);
    assert_eq!(h.core.ctl_signals, vec![RelayControlSignal::ConnectFailed]);

    h.run_until_idle();
    assert_eq!(h.tx.aborts, vec![handle]);
    assert_eq!(h.tx.releases, vec![handle]);

    // The link can be opened again afterwards.
    open(&mut h);
    assert_eq!(h.rt.relay_control_state(), Some(LinkState::Connecting));
}

#[test]
fn only_one_control_link_at_a_time() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    open(&mut h);
    assert_eq!(
        h.rt.open_relay_control(RELAY, &mut h.tx),
        Err(Error::Transport(TransportError::AlreadyOpen))
    );
    assert_eq!(h.tx.connects.len(), 1);
}

#[test]
fn control_link_does_not_take_a_connection_slot() {
    let q = EventQueue::new();
    let cfg = RuntimeConfig { max_connections: 1, ..RuntimeConfig::default() };
    let mut h = Harness::with_config(&q, cfg);
    h.accept(NativeHandle(7), 6000);

    open_connected(&mut h);
    assert_eq!(h.rt.relay_control_state(), Some(LinkState::Connected));
    assert_eq!(h.rt.connections().count(), 1);
}

#[test]
fn refused_control_link_leaves_nothing_behind() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    h.tx.refuse_connect = true;
    assert_eq!(
        h.rt.open_relay_control(RELAY, &mut h.tx),
        Err(Error::Transport(TransportError::ConnectFailed))
    );
    assert_eq!(h.rt.relay_control_state(), None);
}

// ── Listener ──────────────────────────────────────────────────

#[test]
fn server_listens_on_the_configured_port() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);

    h.rt.start_server(&mut h.tx).unwrap();
    assert_eq!(h.tx.listens, vec![DEFAULT_LISTEN_PORT]);
    assert_eq!(
        h.rt.start_server(&mut h.tx),
        Err(Error::Transport(TransportError::AlreadyOpen))
    );

    h.rt.stop_server(&mut h.tx);
    assert_eq!(h.tx.stop_listens, 1);

    let cfg = RuntimeConfig { listen_port: 4000, ..RuntimeConfig::default() };
    let q2 = EventQueue::new();
    let mut h2 = Harness::with_config(&q2, cfg);
    h2.rt.start_server(&mut h2.tx).unwrap();
    assert_eq!(h2.tx.listens, vec![4000]);
}
