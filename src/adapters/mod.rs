//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter         | Implements | Connects to                         |
//! |-----------------|------------|-------------------------------------|
//! | `tcp_transport` | Transport  | non-blocking `std::net` sockets     |
//! | `time`          | -          | ESP32 system timer / `Instant`      |

#[cfg(not(target_os = "espidf"))]
pub mod tcp_transport;
pub mod time;
