//! Wire types exchanged between the coordinator and its workers.
//!
//! Every message travels as one JSON text frame tagged by `type`:
//!
//! - coordinator → worker: [`CoordinatorMessage`]
//! - worker → coordinator: [`WorkerMessage`]
//!
//! [`DispatchCommand`] is built fresh for every dispatch attempt and never
//! persisted. [`ExecutionOutcome`] is terminal: written once to the execution
//! history and never mutated.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::{Job, JobId};

/// Cap on recorded response bodies, in characters.
pub const MAX_RESPONSE_CHARS: usize = 2000;
/// Cap on recorded error messages, in characters.
pub const MAX_ERROR_CHARS: usize = 500;

const TRUNCATION_MARKER: &str = "... (truncated)";

/// Truncate to at most `limit` characters, marker included.
///
/// Applying it twice with the same limit is a no-op.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if limit <= marker_len {
        return text.chars().take(limit).collect();
    }

    let mut truncated: String = text.chars().take(limit - marker_len).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// One attempt to run a job, as sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub job_id: JobId,
    pub job_name: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub scheduled_at: DateTime<Utc>,
    /// Zero-based dispatch attempt that produced this command.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub priority: Priority,
    /// Per-attempt HTTP timeout; zero means "use the executor default".
    pub timeout_secs: u64,
}

impl DispatchCommand {
    pub fn from_job(job: &Job, scheduled_at: DateTime<Utc>, attempt: u32, timeout: Duration) -> Self {
        Self {
            job_id: job.id,
            job_name: job.name.clone(),
            method: job.method.clone(),
            url: job.url.clone(),
            headers: job.header_map(),
            body: job.body.clone(),
            scheduled_at,
            attempt,
            priority: Priority::Normal,
            timeout_secs: timeout.as_secs(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Self-reported load of a worker. Always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub max_concurrent: usize,
    pub current_running: usize,
    pub queue_depth: usize,
    /// Host-wide CPU usage, percent.
    pub cpu_usage: f64,
    /// Worker process resident memory, MB.
    pub memory_usage: f64,
}

impl CapacitySnapshot {
    pub fn idle(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            current_running: 0,
            queue_depth: 0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.current_running >= self.max_concurrent
    }
}

/// What a worker announces about itself on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub name: String,
    pub host: String,
    pub ip_address: String,
    pub port: u16,
    pub capacity: CapacitySnapshot,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub job_id: JobId,
    /// Absent for executions that ran on the coordinator.
    pub worker_id: Option<String>,
    pub success: bool,
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub fired_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    /// A failed outcome that never reached an HTTP target.
    pub fn failure(job_id: JobId, fired_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            job_id,
            worker_id: None,
            success: false,
            status_code: None,
            response: String::new(),
            error: Some(error.into()),
            duration_ms: 0,
            fired_at,
            completed_at: Utc::now(),
        }
        .bounded()
    }

    /// Apply the response and error caps.
    pub fn bounded(mut self) -> Self {
        self.response = truncate_chars(&self.response, MAX_RESPONSE_CHARS);
        self.error = self.error.map(|e| truncate_chars(&e, MAX_ERROR_CHARS));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    ExecuteJob(DispatchCommand),
    /// Liveness probe; the worker answers with [`WorkerMessage::Heartbeat`].
    HeartbeatCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    RegisterWorker(WorkerRegistration),
    ReportJobCompletion(ExecutionOutcome),
    UpdateStatus(CapacitySnapshot),
    Heartbeat {
        capacity: CapacitySnapshot,
        running_job_ids: Vec<JobId>,
        timestamp: DateTime<Utc>,
    },
}
