//! Coordinator-side cluster management.
//!
//! - [`registry`]: worker membership, capacity snapshots and heartbeat ages
//! - [`selector`]: least-loaded worker selection with optimistic slot booking
//! - [`mode`]: per-fire choice between local and distributed execution
//! - [`dispatch`]: the fire-event state machine and its retry loop
//! - [`hub`]: coordinator end of the worker messaging channel
//! - [`liveness`]: periodic eviction sweep and heartbeat probes

pub mod dispatch;
pub mod hub;
pub mod liveness;
pub mod mode;
pub mod registry;
pub mod selector;

pub use dispatch::{DispatchOrchestrator, FireResult, WorkerChannel};
pub use hub::Hub;
pub use liveness::LivenessSweep;
pub use mode::ExecutionModePolicy;
pub use registry::{MembershipEvent, MembershipRegistry, WorkerRecord};
pub use selector::{SelectorStats, WorkerSelector};
