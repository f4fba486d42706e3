use std::sync::Arc;

use crate::cluster::registry::MembershipRegistry;
use crate::scheduler::{ExecutionMode, ExecutionPreference, Job};

/// Decides per fire whether a job runs on the coordinator or on a worker.
///
/// Nothing is cached: `Auto` jobs follow worker churn between firings.
#[derive(Debug, Clone)]
pub struct ExecutionModePolicy {
    clustering_enabled: bool,
    registry: Arc<MembershipRegistry>,
}

impl ExecutionModePolicy {
    pub fn new(clustering_enabled: bool, registry: Arc<MembershipRegistry>) -> Self {
        Self {
            clustering_enabled,
            registry,
        }
    }

    pub async fn determine_mode(&self, job: &Job) -> ExecutionMode {
        match job.execution {
            ExecutionPreference::Local => ExecutionMode::Local,
            // Dispatch may still fail for lack of workers; that is surfaced
            // as a failure, never downgraded to local.
            ExecutionPreference::Distributed => ExecutionMode::Distributed,
            ExecutionPreference::Auto => {
                if !self.clustering_enabled {
                    tracing::debug!(job_id = job.id, "Clustering disabled, running locally");
                    return ExecutionMode::Local;
                }
                if self.registry.list_available().await.is_empty() {
                    tracing::debug!(job_id = job.id, "No available workers, running locally");
                    ExecutionMode::Local
                } else {
                    ExecutionMode::Distributed
                }
            }
        }
    }
}
