use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::WorkerMessage;
use crate::worker::capacity::CapacityProbe;
use crate::worker::executor::HttpExecutor;
use crate::worker::queue::JobQueue;

/// Fixed set of execution slots draining the job queue.
///
/// A slot takes a permit before it dequeues, so a busy pool leaves commands
/// in the bounded queue instead of holding them in memory.
pub struct ExecutionPool {
    queue: Arc<JobQueue>,
    executor: HttpExecutor,
    probe: Arc<CapacityProbe>,
    permits: Arc<Semaphore>,
    size: usize,
    reports: mpsc::Sender<WorkerMessage>,
}

impl ExecutionPool {
    pub fn new(
        size: usize,
        queue: Arc<JobQueue>,
        executor: HttpExecutor,
        probe: Arc<CapacityProbe>,
        reports: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        let size = size.max(1);
        Self {
            queue,
            executor,
            probe,
            permits: Arc::new(Semaphore::new(size)),
            size,
            reports,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn one task per slot. They exit when `cancel` fires.
    pub fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        tracing::info!(slots = self.size, "Starting execution pool");
        (0..self.size)
            .map(|slot| {
                let pool = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { pool.run_slot(slot, cancel).await })
            })
            .collect()
    }

    async fn run_slot(&self, slot: usize, cancel: CancellationToken) {
        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(command) = self.queue.dequeue(&cancel).await else {
                break;
            };
            tracing::debug!(slot, job_id = command.job_id, "Slot picked up job");

            let outcome = self.executor.execute(&command, &cancel).await;
            drop(permit);
            self.queue.running().remove(command.job_id).await;

            match outcome {
                Some(outcome) => self.report(WorkerMessage::ReportJobCompletion(outcome), &cancel).await,
                None => tracing::info!(slot, job_id = command.job_id, "Execution cancelled, no completion reported"),
            }
            let status = self.probe.snapshot().await;
            self.report(WorkerMessage::UpdateStatus(status), &cancel).await;
        }
        tracing::debug!(slot, "Execution slot stopped");
    }

    async fn report(&self, message: WorkerMessage, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            sent = self.reports.send(message) => {
                if sent.is_err() {
                    tracing::warn!("Report channel closed, dropping message");
                }
            }
        }
    }
}
