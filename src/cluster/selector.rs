use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::cluster::registry::{MembershipRegistry, WorkerRecord};
use crate::scheduler::JobId;

/// Counters exposed on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectorStats {
    pub attempts: u64,
    pub selected: u64,
    pub misses: u64,
}

/// Least-loaded worker selection.
///
/// Orders available workers by running jobs, then by CPU usage, and books a
/// slot on the winner before returning it. The booking is optimistic: the
/// worker's next heartbeat replaces the count with its own figure.
#[derive(Debug)]
pub struct WorkerSelector {
    registry: Arc<MembershipRegistry>,
    attempts: AtomicU64,
    selected: AtomicU64,
}

impl WorkerSelector {
    pub fn new(registry: Arc<MembershipRegistry>) -> Self {
        Self {
            registry,
            attempts: AtomicU64::new(0),
            selected: AtomicU64::new(0),
        }
    }

    pub async fn select_for_job(&self, job_id: JobId) -> Option<WorkerRecord> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let selected = self
            .registry
            .claim_slot(|candidates| {
                candidates
                    .into_iter()
                    .min_by(|a, b| compare_load(a, b))
                    .map(|w| w.id.clone())
            })
            .await;

        match &selected {
            Some(worker) => {
                self.selected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    job_id,
                    worker_id = %worker.id,
                    running = worker.capacity.current_running,
                    "Worker selected"
                );
            }
            None => tracing::debug!(job_id, "No worker available"),
        }
        selected
    }

    pub fn stats(&self) -> SelectorStats {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let selected = self.selected.load(Ordering::Relaxed);
        SelectorStats {
            attempts,
            selected,
            misses: attempts.saturating_sub(selected),
        }
    }
}

fn compare_load(a: &WorkerRecord, b: &WorkerRecord) -> CmpOrdering {
    a.capacity
        .current_running
        .cmp(&b.capacity.current_running)
        .then_with(|| a.capacity.cpu_usage.total_cmp(&b.capacity.cpu_usage))
        // Stable choice among exact ties.
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::protocol::{CapacitySnapshot, WorkerRegistration};

    fn registration(max: usize) -> WorkerRegistration {
        WorkerRegistration {
            name: "w".to_string(),
            host: "h".to_string(),
            ip_address: "127.0.0.1".to_string(),
            port: 1,
            capacity: CapacitySnapshot::idle(max),
            version: "test".to_string(),
        }
    }

    async fn registry_with(workers: &[(&str, usize, usize, f64)]) -> Arc<MembershipRegistry> {
        let registry = Arc::new(MembershipRegistry::new(&RegistryConfig::default()));
        for (id, max, running, cpu) in workers {
            registry.register(id, registration(*max)).await;
            let snapshot = CapacitySnapshot {
                max_concurrent: *max,
                current_running: *running,
                queue_depth: 0,
                cpu_usage: *cpu,
                memory_usage: 0.0,
            };
            registry.update_status(id, snapshot).await;
        }
        registry
    }

    #[tokio::test]
    async fn picks_least_running() {
        let registry = registry_with(&[("busy", 10, 5, 0.1), ("idle", 10, 1, 0.9)]).await;
        let selector = WorkerSelector::new(registry);

        let worker = selector.select_for_job(1).await.unwrap();
        assert_eq!(worker.id, "idle");
    }

    #[tokio::test]
    async fn cpu_breaks_ties() {
        let registry = registry_with(&[("hot", 10, 2, 0.8), ("cool", 10, 2, 0.2)]).await;
        let selector = WorkerSelector::new(registry);

        assert_eq!(selector.select_for_job(1).await.unwrap().id, "cool");
    }

    #[tokio::test]
    async fn selection_books_exactly_one_slot() {
        let registry = registry_with(&[("w1", 3, 1, 0.0)]).await;
        let selector = WorkerSelector::new(registry.clone());

        let worker = selector.select_for_job(1).await.unwrap();
        assert_eq!(worker.capacity.current_running, 2);
        assert_eq!(registry.get("w1").await.unwrap().capacity.current_running, 2);
    }

    #[tokio::test]
    async fn saturated_workers_are_never_returned() {
        let registry = registry_with(&[("full", 2, 2, 0.0)]).await;
        let selector = WorkerSelector::new(registry);

        assert!(selector.select_for_job(1).await.is_none());
        assert_eq!(
            selector.stats(),
            SelectorStats {
                attempts: 1,
                selected: 0,
                misses: 1
            }
        );
    }

    #[tokio::test]
    async fn concurrent_selection_does_not_double_book() {
        let registry = registry_with(&[("a", 3, 0, 0.0), ("b", 2, 0, 0.0)]).await;
        let selector = Arc::new(WorkerSelector::new(registry.clone()));

        let mut handles = Vec::new();
        for job_id in 0..20 {
            let selector = selector.clone();
            handles.push(tokio::spawn(async move { selector.select_for_job(job_id).await }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                granted += 1;
            }
        }

        // Five slots in total across both workers.
        assert_eq!(granted, 5);
        assert_eq!(registry.get("a").await.unwrap().capacity.current_running, 3);
        assert_eq!(registry.get("b").await.unwrap().capacity.current_running, 2);
    }
}
