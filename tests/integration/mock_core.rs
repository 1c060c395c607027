//! Mock protocol core and application registry.

use std::collections::HashMap;

use peerlink::connection::ConnectionId;
use peerlink::relay::SessionId;
use peerlink::runtime::ports::{AppContext, AppRegistry, CoreIo, ProtocolCore, RelayControlSignal, TransportSignal};

// ── MockCore ──────────────────────────────────────────────────

pub struct MockCore {
    rx_size: usize,
    /// Bytes consumed per processing pass.
    pub chunk: usize,
    buffers: HashMap<ConnectionId, Vec<u8>>,
    /// Everything passed to `feed`, per connection.
    pub fed: HashMap<ConnectionId, Vec<u8>>,
    /// Bytes consumed by `process`, per connection.
    pub processed: HashMap<ConnectionId, Vec<u8>>,
    pub passes: u32,
    pub signals: Vec<(ConnectionId, TransportSignal)>,
    pub from_apps: Vec<(SessionId, Vec<u8>)>,
    pub ctl_signals: Vec<RelayControlSignal>,
    /// Bytes received on the relay control link.
    pub ctl_fed: Vec<u8>,
    /// Send every processed chunk back on the same connection.
    pub echo: bool,
    /// Answer each app message with a core-to-app message.
    pub reply_to_apps: bool,
}

#[allow(dead_code)]
impl MockCore {
    pub fn new(rx_size: usize) -> Self {
        Self {
            rx_size,
            chunk: usize::MAX,
            buffers: HashMap::new(),
            fed: HashMap::new(),
            processed: HashMap::new(),
            passes: 0,
            signals: Vec::new(),
            from_apps: Vec::new(),
            ctl_signals: Vec::new(),
            ctl_fed: Vec::new(),
            echo: false,
            reply_to_apps: false,
        }
    }

    pub fn fed_len(&self, conn: ConnectionId) -> usize {
        self.fed.get(&conn).map_or(0, Vec::len)
    }

    pub fn buffered(&self, conn: ConnectionId) -> usize {
        self.buffers.get(&conn).map_or(0, Vec::len)
    }

    pub fn signals_for(&self, conn: ConnectionId) -> Vec<TransportSignal> {
        self.signals.iter().filter(|(c, _)| *c == conn).map(|(_, s)| *s).collect()
    }
}

impl ProtocolCore for MockCore {
    fn rx_buffer_free(&self, conn: ConnectionId) -> usize {
        self.rx_size.saturating_sub(self.buffered(conn))
    }

    fn feed(&mut self, conn: ConnectionId, data: &[u8]) {
        self.buffers.entry(conn).or_default().extend_from_slice(data);
        self.fed.entry(conn).or_default().extend_from_slice(data);
    }

    fn process(&mut self, conn: ConnectionId, io: &mut dyn CoreIo) {
        self.passes += 1;
        let buf = self.buffers.entry(conn).or_default();
        let n = buf.len().min(self.chunk);
        let taken: Vec<u8> = buf.drain(..n).collect();
        self.processed.entry(conn).or_default().extend_from_slice(&taken);
        if self.echo && !taken.is_empty() {
            let _ = io.send(conn, &taken);
        }
    }

    fn signal_transport_event(&mut self, conn: ConnectionId, signal: TransportSignal, _io: &mut dyn CoreIo) {
        if matches!(signal, TransportSignal::Disconnected | TransportSignal::ClientDisconnected) {
            self.buffers.remove(&conn);
        }
        self.signals.push((conn, signal));
    }

    fn receive_app_to_core(&mut self, session: &SessionId, data: &[u8], io: &mut dyn CoreIo) {
        self.from_apps.push((*session, data.to_vec()));
        if self.reply_to_apps {
            let _ = io.relay_core_to_app(*session, data);
        }
    }

    fn signal_relay_control(&mut self, signal: RelayControlSignal, _io: &mut dyn CoreIo) {
        self.ctl_signals.push(signal);
    }

    fn feed_relay_control(&mut self, data: &[u8], _io: &mut dyn CoreIo) {
        self.ctl_fed.extend_from_slice(data);
    }
}

// ── Applications ──────────────────────────────────────────────

#[derive(Default)]
pub struct MockApp {
    pub received: Vec<Vec<u8>>,
    /// Respond to every message with an app-to-core message.
    pub bounce: bool,
    session: Option<SessionId>,
}

impl AppContext for MockApp {
    fn receive_core_to_app(&mut self, data: &[u8], io: &mut dyn CoreIo) {
        self.received.push(data.to_vec());
        if let (true, Some(session)) = (self.bounce, self.session) {
            let _ = io.relay_app_to_core(session, data);
        }
    }
}

#[derive(Default)]
pub struct MockApps {
    pub apps: HashMap<SessionId, MockApp>,
}

#[allow(dead_code)]
impl MockApps {
    pub fn with(sessions: &[SessionId]) -> Self {
        let mut apps = Self::default();
        for s in sessions {
            apps.apps.insert(*s, MockApp { session: Some(*s), ..MockApp::default() });
        }
        apps
    }

    pub fn received(&self, session: &SessionId) -> Vec<Vec<u8>> {
        self.apps.get(session).map(|a| a.received.clone()).unwrap_or_default()
    }
}

impl AppRegistry for MockApps {
    fn app(&mut self, session: &SessionId) -> Option<&mut dyn AppContext> {
        self.apps.get_mut(session).map(|a| a as &mut dyn AppContext)
    }
}
