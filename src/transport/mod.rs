//! Carriers for the coordinator/worker message protocol.
//!
//! - [`ws`]: JSON text frames over a WebSocket, served at `/hub`
//! - [`local`]: tokio channels inside one process

pub mod local;
pub mod ws;

pub use local::connect_local;
pub use ws::{hub_socket, run_worker_link};
