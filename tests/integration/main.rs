//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! through the public `Runtime` API against mock adapters.  All tests run
//! on the host with no sockets required.

mod control_link_tests;
mod flow_tests;
mod harness;
mod mock_core;
mod scheduler_tests;
