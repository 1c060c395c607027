//! PeerLink runtime library.
//!
//! Event dispatch and per-connection flow control for a constrained
//! peer-to-peer device.  The protocol engine, applications and native
//! sockets plug in through the traits in [`runtime::ports`]; all
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod flow;
pub mod relay;
pub mod runtime;
pub mod scheduler;


pub use config::RuntimeConfig;
pub use connection::{ConnectionId, Endpoint, NativeHandle};
pub use error::{Error, Result};
pub use events::EventQueue;
pub use runtime::Runtime;
