use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{FleetError, Result};
use crate::protocol::ExecutionOutcome;
use crate::scheduler::job::{Job, JobId, JobStatus};

/// Persistent home of job definitions and their execution history.
///
/// Execution history is append-only; outcomes are never updated.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>>;

    async fn list_jobs(&self) -> Result<Vec<Job>>;

    async fn record_outcome(&self, outcome: ExecutionOutcome) -> Result<()>;

    /// History for one job, oldest first.
    async fn executions(&self, job_id: JobId) -> Result<Vec<ExecutionOutcome>>;
}

/// Memory-resident store used by the coordinator binary and tests.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    executions: RwLock<Vec<ExecutionOutcome>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        Self {
            jobs: RwLock::new(jobs.into_iter().map(|j| (j.id, j)).collect()),
            executions: RwLock::new(Vec::new()),
        }
    }

    /// Load a JSON array of job definitions.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let jobs: Vec<Job> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), count = jobs.len(), "Loaded job definitions");
        Ok(Self::with_jobs(jobs))
    }

    pub async fn upsert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn set_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(FleetError::JobNotFound(id))?;
        job.status = status;
        job.updated_at = chrono::Utc::now();
        Ok(())
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn record_outcome(&self, outcome: ExecutionOutcome) -> Result<()> {
        self.executions.write().await.push(outcome.bounded());
        Ok(())
    }

    async fn executions(&self, job_id: JobId) -> Result<Vec<ExecutionOutcome>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }
}
