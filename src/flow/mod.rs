//! Flow control on both directions of a connection.
//!
//! | Module      | Direction | Bounds                                  |
//! |-------------|-----------|-----------------------------------------|
//! | `outbound`  | device →  | one buffer in flight, FIFO depth limit  |
//! | `admission` | → device  | protocol-core receive-buffer headroom   |

pub mod admission;
pub mod outbound;

pub use admission::AdmissionController;
pub use outbound::{OutboundController, SendOutcome};
