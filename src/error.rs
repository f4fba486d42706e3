use std::time::Duration;

use thiserror::Error;

use crate::scheduler::JobId;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("No workers available")]
    NoWorkersAvailable,

    #[error("Channel to {0} is closed")]
    ChannelClosed(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid schedule {0}")]
    InvalidSchedule(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
