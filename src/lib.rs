pub mod backoff;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod transport;
pub mod worker;
