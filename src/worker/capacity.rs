use std::sync::Arc;

use chrono::Utc;
use sysinfo::{Pid, System};
use tokio::sync::Mutex;

use crate::protocol::{CapacitySnapshot, WorkerMessage};
use crate::worker::queue::JobQueue;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Builds the capacity figures a worker reports about itself.
///
/// CPU usage is measured between consecutive refreshes, so the first
/// snapshot after startup reads 0.0.
#[derive(Debug)]
pub struct CapacityProbe {
    max_concurrent: usize,
    queue: Arc<JobQueue>,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl CapacityProbe {
    pub fn new(max_concurrent: usize, queue: Arc<JobQueue>) -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!(error = e, "Cannot resolve own pid, memory will read 0"))
            .ok();
        Self {
            max_concurrent,
            queue,
            system: Mutex::new(System::new()),
            pid,
        }
    }

    pub async fn snapshot(&self) -> CapacitySnapshot {
        let (cpu_usage, memory_usage) = self.host_usage().await;
        CapacitySnapshot {
            max_concurrent: self.max_concurrent,
            current_running: self.queue.running().count().await,
            queue_depth: self.queue.size(),
            cpu_usage,
            memory_usage,
        }
    }

    pub async fn heartbeat(&self) -> WorkerMessage {
        WorkerMessage::Heartbeat {
            capacity: self.snapshot().await,
            running_job_ids: self.queue.running().ids().await,
            timestamp: Utc::now(),
        }
    }

    async fn host_usage(&self) -> (f64, f64) {
        let mut system = self.system.lock().await;
        system.refresh_cpu();
        let cpu = f64::from(system.global_cpu_info().cpu_usage());

        let memory = match self.pid {
            Some(pid) if system.refresh_process(pid) => system
                .process(pid)
                .map(|process| process.memory() as f64 / BYTES_PER_MB)
                .unwrap_or(0.0),
            _ => 0.0,
        };
        (cpu, memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_queue_and_running_set() {
        let queue = Arc::new(JobQueue::new(8));
        queue.running().insert(4).await;
        let probe = CapacityProbe::new(3, queue);

        let snapshot = probe.snapshot().await;
        assert_eq!(snapshot.max_concurrent, 3);
        assert_eq!(snapshot.current_running, 1);
        assert_eq!(snapshot.queue_depth, 0);

        match probe.heartbeat().await {
            WorkerMessage::Heartbeat { running_job_ids, .. } => assert_eq!(running_job_ids, vec![4]),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reports_host_figures() {
        let probe = CapacityProbe::new(1, Arc::new(JobQueue::new(1)));
        probe.snapshot().await;
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        let snapshot = probe.snapshot().await;
        assert!((0.0..=100.0).contains(&snapshot.cpu_usage), "cpu {}", snapshot.cpu_usage);
        // A running test binary always has some resident memory.
        assert!(snapshot.memory_usage > 0.0, "memory {}", snapshot.memory_usage);
    }
}
