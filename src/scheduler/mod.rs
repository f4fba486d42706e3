pub mod job;
pub mod store;
pub mod trigger;

pub use job::{ExecutionMode, ExecutionPreference, Job, JobId, JobStatus, Schedule};
pub use store::{JobStore, MemoryJobStore};
pub use trigger::TriggerEngine;
