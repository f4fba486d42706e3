use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::backoff::{backoff_delay, sleep_or_cancel};
use crate::cluster::mode::ExecutionModePolicy;
use crate::cluster::registry::MembershipRegistry;
use crate::cluster::selector::WorkerSelector;
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::protocol::{DispatchCommand, ExecutionOutcome};
use crate::scheduler::{ExecutionMode, Job, JobId, JobStore};
use crate::worker::executor::HttpExecutor;

pub const NO_WORKER_ERROR: &str = "no available worker found after all retries";
pub const SEND_FAILED_ERROR: &str = "failed to dispatch job after all retry attempts";

/// Delivers a command to one connected worker.
///
/// Success means the command was handed to the worker's connection, not
/// that the job ran. The result arrives later as a completion report.
#[async_trait]
pub trait WorkerChannel: Send + Sync {
    async fn send_command(&self, worker_id: &str, command: DispatchCommand) -> Result<()>;
}

/// How a single fire event ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireResult {
    /// Job missing, paused, without URL, or not fetchable in time.
    Skipped,
    Dispatched { worker_id: String, attempts: u32 },
    Executed { success: bool },
    /// Retries exhausted; a failed outcome was recorded.
    Failed,
    Cancelled,
}

impl FireResult {
    /// Boolean reported to manual on-demand triggers.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FireResult::Dispatched { .. } | FireResult::Executed { success: true }
        )
    }
}

enum AttemptFailure {
    NoWorker,
    SendFailed,
}

/// Runs one fire event: fetch, validate, pick a mode, then either execute
/// locally or drive the select-and-send retry loop.
pub struct DispatchOrchestrator {
    store: Arc<dyn JobStore>,
    registry: Arc<MembershipRegistry>,
    selector: Arc<WorkerSelector>,
    policy: ExecutionModePolicy,
    channel: Arc<dyn WorkerChannel>,
    executor: HttpExecutor,
    config: DispatchConfig,
}

impl DispatchOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<MembershipRegistry>,
        channel: Arc<dyn WorkerChannel>,
        executor: HttpExecutor,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            selector: Arc::new(WorkerSelector::new(registry.clone())),
            policy: ExecutionModePolicy::new(config.clustering_enabled, registry.clone()),
            registry,
            channel,
            executor,
            config,
        }
    }

    pub fn selector(&self) -> &Arc<WorkerSelector> {
        &self.selector
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Entry point for the trigger engine. Failures end up in the execution
    /// history, never in the return value's error path.
    pub async fn fire(&self, job_id: JobId, fired_at: DateTime<Utc>, cancel: &CancellationToken) -> FireResult {
        let job = tokio::select! {
            _ = cancel.cancelled() => return FireResult::Cancelled,
            job = self.fetch(job_id) => job,
        };
        let Some(job) = job else {
            return FireResult::Skipped;
        };

        if !job.is_executable() {
            tracing::debug!(job_id, status = %job.status, "Job is not executable, skipping fire");
            return FireResult::Skipped;
        }

        let mode = self.policy.determine_mode(&job).await;
        tracing::info!(job_id, job_name = %job.name, mode = %mode, "Job fired");

        let result = match mode {
            ExecutionMode::Local => self.execute_local(&job, fired_at, cancel).await,
            ExecutionMode::Distributed => self.dispatch_remote(&job, fired_at, cancel).await,
        };

        if result == FireResult::Cancelled {
            tracing::info!(job_id, "Fire cancelled, nothing recorded");
        }
        result
    }

    /// Manual on-demand trigger. True when the dispatch step succeeded.
    pub async fn trigger_now(&self, job_id: JobId, cancel: &CancellationToken) -> bool {
        self.fire(job_id, Utc::now(), cancel).await.is_success()
    }

    async fn fetch(&self, job_id: JobId) -> Option<Job> {
        match tokio::time::timeout(self.config.fetch_timeout, self.store.find_by_id(job_id)).await {
            Ok(Ok(Some(job))) => Some(job),
            Ok(Ok(None)) => {
                tracing::warn!(job_id, "Job not found, skipping fire");
                None
            }
            Ok(Err(e)) => {
                tracing::error!(job_id, error = %e, "Job fetch failed, skipping fire");
                None
            }
            Err(_) => {
                tracing::warn!(
                    job_id,
                    timeout_ms = self.config.fetch_timeout.as_millis() as u64,
                    "Job fetch timed out, skipping fire"
                );
                None
            }
        }
    }

    async fn execute_local(&self, job: &Job, fired_at: DateTime<Utc>, cancel: &CancellationToken) -> FireResult {
        let command = DispatchCommand::from_job(job, fired_at, 0, self.config.default_job_timeout);
        match self.executor.execute(&command, cancel).await {
            Some(outcome) => {
                let success = outcome.success;
                self.record(outcome).await;
                FireResult::Executed { success }
            }
            None => FireResult::Cancelled,
        }
    }

    async fn dispatch_remote(&self, job: &Job, fired_at: DateTime<Utc>, cancel: &CancellationToken) -> FireResult {
        let max_retries = self.config.max_retries;
        let mut last_error = NO_WORKER_ERROR;

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                return FireResult::Cancelled;
            }

            match self.try_dispatch(job, fired_at, attempt).await {
                Ok(worker_id) => {
                    tracing::info!(job_id = job.id, worker_id = %worker_id, attempt = attempt + 1, "Job dispatched");
                    return FireResult::Dispatched {
                        worker_id,
                        attempts: attempt + 1,
                    };
                }
                Err(AttemptFailure::NoWorker) => last_error = NO_WORKER_ERROR,
                Err(AttemptFailure::SendFailed) => last_error = SEND_FAILED_ERROR,
            }

            if attempt < max_retries {
                let delay = backoff_delay(self.config.retry_delay, attempt);
                tracing::warn!(
                    job_id = job.id,
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Dispatch attempt failed, backing off"
                );
                if !sleep_or_cancel(delay, cancel).await {
                    return FireResult::Cancelled;
                }
            }
        }

        tracing::error!(job_id = job.id, attempts = max_retries + 1, error = last_error, "Dispatch failed");
        self.record(ExecutionOutcome::failure(job.id, fired_at, last_error)).await;
        FireResult::Failed
    }

    async fn try_dispatch(
        &self,
        job: &Job,
        fired_at: DateTime<Utc>,
        attempt: u32,
    ) -> std::result::Result<String, AttemptFailure> {
        let worker = match tokio::time::timeout(self.config.selection_timeout, self.selector.select_for_job(job.id)).await {
            Ok(Some(worker)) => worker,
            Ok(None) => return Err(AttemptFailure::NoWorker),
            Err(_) => {
                tracing::warn!(job_id = job.id, "Worker selection timed out");
                return Err(AttemptFailure::NoWorker);
            }
        };

        let command = DispatchCommand::from_job(job, fired_at, attempt, self.config.default_job_timeout);
        let sent = tokio::time::timeout(
            self.config.send_timeout,
            self.channel.send_command(&worker.id, command),
        )
        .await;

        match sent {
            Ok(Ok(())) => Ok(worker.id),
            Ok(Err(e)) => {
                tracing::warn!(job_id = job.id, worker_id = %worker.id, error = %e, "Failed to send job to worker");
                self.registry.release_slot(&worker.id).await;
                Err(AttemptFailure::SendFailed)
            }
            Err(_) => {
                tracing::warn!(job_id = job.id, worker_id = %worker.id, "Sending job to worker timed out");
                self.registry.release_slot(&worker.id).await;
                Err(AttemptFailure::SendFailed)
            }
        }
    }

    async fn record(&self, outcome: ExecutionOutcome) {
        let job_id = outcome.job_id;
        if let Err(e) = self.store.record_outcome(outcome).await {
            tracing::error!(job_id, error = %e, "Failed to record execution outcome");
        }
    }
}
