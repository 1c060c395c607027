//! Outbound flow control and inbound admission through the runtime.

use peerlink::config::RuntimeConfig;
use peerlink::connection::{ConnectionId, ConnectionState, NativeHandle};
use peerlink::error::{Error, ResourceError};
use peerlink::events::{Event, EventQueue};
use peerlink::flow::SendOutcome;
use peerlink::runtime::ports::NativeEvent;

use crate::harness::Harness;

const H: NativeHandle = NativeHandle(7);

// ── Outbound ──────────────────────────────────────────────────

#[test]
fn ten_then_twenty_bytes_go_out_in_order() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);

    assert_eq!(h.rt.send(c, &[1; 10], &mut h.tx), Ok(SendOutcome::Submitted));
    assert_eq!(h.rt.send(c, &[2; 20], &mut h.tx), Ok(SendOutcome::Queued));
    assert_eq!(h.tx.sent_lens(H), vec![10]);

    h.complete(H);
    assert_eq!(h.tx.sent_lens(H), vec![10, 20]);

    h.complete(H);
    assert!(!h.rt.is_busy(c));
    assert_eq!(h.rt.outbound_backlog(), 0);
}

#[test]
fn bytes_reach_the_wire_in_enqueue_order_exactly_once() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);

    let msgs: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; usize::from(i) + 1]).collect();
    for m in &msgs {
        h.rt.send(c, m, &mut h.tx).unwrap();
    }
    while h.rt.is_busy(c) {
        h.complete(H);
    }

    assert_eq!(h.tx.payloads(H), msgs);
    assert_eq!(h.tx.max_in_flight, 1);
    assert_eq!(h.rt.stats().flow.buffers_freed, 8);
}

#[test]
fn stalled_head_is_retried_on_writable() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);
    h.tx.full_for = 1;

    assert_eq!(h.rt.send(c, b"first", &mut h.tx), Ok(SendOutcome::Stalled));
    assert!(h.tx.sends.is_empty());
    assert_eq!(h.rt.queued(c), 1);

    h.native(NativeEvent::Writable { handle: H });
    assert_eq!(h.tx.payloads(H), vec![b"first".to_vec()]);
    assert!(h.rt.is_busy(c));
}

#[test]
fn stalled_head_goes_before_a_later_send() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);
    h.tx.full_for = 1;

    h.rt.send(c, b"A", &mut h.tx).unwrap();
    assert_eq!(h.rt.send(c, b"B", &mut h.tx), Ok(SendOutcome::Submitted));
    assert_eq!(h.tx.payloads(H), vec![b"A".to_vec()]);

    h.complete(H);
    assert_eq!(h.tx.payloads(H), vec![b"A".to_vec(), b"B".to_vec()]);
}

#[test]
fn unrecoverable_send_failure_closes_through_the_queue() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);
    h.tx.fail_next = true;

    assert_eq!(h.rt.send(c, b"lost", &mut h.tx), Ok(SendOutcome::Aborted));
    assert_eq!(h.rt.queued(c), 0);
    assert!(h.tx.disconnects.is_empty());
    assert_eq!(q.len(), 1);

    h.run_until_idle();
    assert_eq!(h.rt.connection(c).unwrap().state(), ConnectionState::Closing);
    assert_eq!(h.tx.disconnects, vec![H]);
    assert_eq!(h.rt.stats().flow.sends_failed, 1);
}

#[test]
fn send_to_unknown_connection_is_rejected() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    assert_eq!(
        h.rt.send(ConnectionId(42), b"x", &mut h.tx),
        Err(Error::NotConnected(ConnectionId(42)))
    );
}

#[test]
fn fifo_depth_is_configurable() {
    let q = EventQueue::new();
    let cfg = RuntimeConfig { max_outbound_depth: 2, ..RuntimeConfig::default() };
    let mut h = Harness::with_config(&q, cfg);
    let c = h.accept(H, 5000);

    h.rt.send(c, b"1", &mut h.tx).unwrap();
    h.rt.send(c, b"2", &mut h.tx).unwrap();
    assert_eq!(
        h.rt.send(c, b"3", &mut h.tx),
        Err(Error::Resource(ResourceError::OutboundFifoFull))
    );
    assert_eq!(h.rt.stats().flow.sends_rejected, 1);
}

#[test]
fn sends_are_still_accepted_while_closing() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);
    h.rt.close_connection(c, &mut h.tx, &mut h.core).unwrap();

    assert_eq!(h.rt.send(c, b"bye", &mut h.tx), Ok(SendOutcome::Submitted));
}

// ── Inbound ───────────────────────────────────────────────────

#[test]
fn oversize_inbound_raises_exactly_one_closing_and_feeds_nothing() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);

    h.receive(H, &[0u8; 2000]);

    assert_eq!(h.core.fed_len(c), 0);
    assert!(h.tx.disconnects.is_empty());
    assert!(h.tx.holds.is_empty());
    assert_eq!(q.pop(), Some(Event::closing(c)));
    assert_eq!(q.pop(), None);
    assert_eq!(h.rt.connection(c).unwrap().state(), ConnectionState::Connected);
}

#[test]
fn admission_failure_closes_on_the_next_turn() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);

    h.receive(H, &[0u8; 2000]);
    h.run_until_idle();

    assert_eq!(h.rt.connection(c).unwrap().state(), ConnectionState::Closing);
    assert_eq!(h.tx.disconnects, vec![H]);
    assert_eq!(h.rt.stats().admission.rejected, 1);
}

#[test]
fn admitted_bytes_are_held_then_drained_and_released() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);

    h.receive(H, b"hello peer");
    assert_eq!(h.tx.holds, vec![H]);
    assert!(h.rt.connection(c).unwrap().is_rx_held());
    assert_eq!(h.core.fed_len(c), 10);

    h.run_until_idle();
    assert_eq!(h.core.processed[&c], b"hello peer".to_vec());
    assert_eq!(h.tx.unholds, vec![H]);
    assert!(!h.rt.connection(c).unwrap().is_rx_held());
}

#[test]
fn processing_may_send_through_core_io() {
    let q = EventQueue::new();
    let mut h = Harness::new(&q);
    let c = h.accept(H, 5000);
    h.core.echo = true;

    h.receive(H, b"ping");
    h.turn();
    assert_eq!(h.tx.payloads(H), vec![b"ping".to_vec()]);
    assert!(h.rt.is_busy(c));
}
