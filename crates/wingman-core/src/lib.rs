//! wingman-core — the local control plane's business logic.
//!
//! Owns the durable store, the HTTP fetcher, and the two long-running
//! services (downloads, inference) that the control-plane binary wires up
//! to an HTTP/WebSocket front end. Nothing in this crate talks HTTP itself;
//! it exposes plain async functions and types for `wingman-control` to call.

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod download_service;
pub mod error;
pub mod fetcher;
pub mod inference_supervisor;
pub mod metadata;
pub mod model;
pub mod process;
pub mod store;
pub mod telemetry;

pub use cancel::CancellationToken;
pub use config::WingmanHome;
pub use error::{Error, Result};
pub use store::Store;
