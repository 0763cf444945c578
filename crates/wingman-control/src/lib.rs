//! Library half of the control-plane binary, split out purely so
//! `tests/integration_tests.rs` can boot a real server in-process instead of
//! shelling out to the compiled binary.

pub mod handlers;
pub mod server;
pub mod ws;
