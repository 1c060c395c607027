//! A runtime wired to the mock adapters.

use peerlink::config::RuntimeConfig;
use peerlink::connection::{ConnectionId, Endpoint, NativeHandle};
use peerlink::events::EventQueue;
use peerlink::runtime::Runtime;
use peerlink::runtime::ports::NativeEvent;

use crate::mock_core::{MockApps, MockCore};
use crate::mock_transport::MockTransport;

pub const LOCAL: Endpoint = Endpoint::new([192, 168, 4, 1], 37008);

/// Upper bound on turns for `run_until_idle`.
const MAX_TURNS: u32 = 64;

pub struct Harness<'q> {
    pub rt: Runtime<'q>,
    pub tx: MockTransport,
    pub core: MockCore,
    pub apps: MockApps,
}

#[allow(dead_code)]
impl<'q> Harness<'q> {
    pub fn new(events: &'q EventQueue) -> Self {
        Self::with_config(events, RuntimeConfig::default())
    }

    pub fn with_config(events: &'q EventQueue, config: RuntimeConfig) -> Self {
        let rx = config.rx_buffer_size;
        Self {
            rt: Runtime::new(config, events).unwrap(),
            tx: MockTransport::new(),
            core: MockCore::new(rx),
            apps: MockApps::default(),
        }
    }

    pub fn native(&mut self, event: NativeEvent<'_>) {
        self.rt.on_native(event, &mut self.tx, &mut self.core);
    }

    /// Accept an inbound peer on `handle` and return its connection.
    pub fn accept(&mut self, handle: NativeHandle, remote_port: u16) -> ConnectionId {
        let remote = Endpoint::new([192, 168, 4, 2], remote_port);
        self.native(NativeEvent::Accepted { handle, local: LOCAL, remote });
        self.rt.identify(remote, LOCAL).expect("accepted connection is tracked")
    }

    /// Open an outbound connection and complete the native connect.
    pub fn connect(&mut self, remote: Endpoint, via_relay: bool) -> (ConnectionId, NativeHandle) {
        let conn = self.rt.open_connection(remote, via_relay, &mut self.tx).unwrap();
        let handle = self.tx.connects.last().unwrap().1;
        self.native(NativeEvent::Connected { handle, local: LOCAL });
        (conn, handle)
    }

    pub fn receive(&mut self, handle: NativeHandle, data: &[u8]) {
        self.native(NativeEvent::Received { handle, data });
    }

    /// Acknowledge the in-flight buffer on `handle`.
    pub fn complete(&mut self, handle: NativeHandle) {
        self.tx.complete(handle);
        self.native(NativeEvent::Sent { handle });
    }

    /// One scheduler turn; `true` while work remains.
    pub fn turn(&mut self) -> bool {
        self.rt.run_once(&mut self.tx, &mut self.core, &mut self.apps)
    }

    /// Run turns until idle (bounded); returns the number of turns taken.
    pub fn run_until_idle(&mut self) -> u32 {
        let mut turns = 0;
        while turns < MAX_TURNS {
            turns += 1;
            if !self.turn() {
                break;
            }
        }
        turns
    }

    pub fn tick(&mut self, now_secs: u64) {
        self.rt.tick(now_secs, &mut self.tx, &mut self.core);
    }
}
