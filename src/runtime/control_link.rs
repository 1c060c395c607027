//! Network-relay control link.
//!
//! A single outbound socket to the relay server.  It lives outside the
//! connection table: inbound bytes go straight to the protocol core and
//! sends bypass the outbound FIFOs.

use crate::connection::{Endpoint, NativeHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    /// Disconnect requested, waiting for the native confirmation.
    Closing,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlLink {
    pub handle: NativeHandle,
    pub remote: Endpoint,
    pub state: LinkState,
}

impl ControlLink {
    pub fn new(handle: NativeHandle, remote: Endpoint) -> Self {
        Self { handle, remote, state: LinkState::Connecting }
    }
}
