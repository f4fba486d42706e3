use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{FleetError, Result};
use crate::protocol::DispatchCommand;
use crate::scheduler::JobId;

/// Job ids currently executing on this worker.
///
/// Counted per id: the same job dispatched twice is running twice.
#[derive(Debug, Default)]
pub struct RunningJobs {
    jobs: Mutex<HashMap<JobId, usize>>,
}

impl RunningJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job_id: JobId) {
        *self.jobs.lock().await.entry(job_id).or_insert(0) += 1;
    }

    pub async fn remove(&self, job_id: JobId) {
        let mut jobs = self.jobs.lock().await;
        if let Some(count) = jobs.get_mut(&job_id) {
            *count -= 1;
            if *count == 0 {
                jobs.remove(&job_id);
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.jobs.lock().await.values().sum()
    }

    /// Distinct running job ids, sorted.
    pub async fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Bounded FIFO of pending commands on a worker.
///
/// `enqueue` waits while the queue is full. Consumers take turns on the
/// receiver, so each command is handed out exactly once.
#[derive(Debug)]
pub struct JobQueue {
    tx: mpsc::Sender<DispatchCommand>,
    rx: Mutex<mpsc::Receiver<DispatchCommand>>,
    depth: AtomicUsize,
    capacity: usize,
    running: Arc<RunningJobs>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
            capacity,
            running: Arc::new(RunningJobs::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn running(&self) -> &Arc<RunningJobs> {
        &self.running
    }

    pub async fn enqueue(&self, command: DispatchCommand) -> Result<()> {
        let job_id = command.job_id;
        // Waiting for space is the only await; dropping this future there
        // leaves nothing counted.
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| FleetError::ChannelClosed("job queue".to_string()))?;
        // Counted before the item is visible so a racing dequeue never underflows.
        self.depth.fetch_add(1, Ordering::SeqCst);
        permit.send(command);
        tracing::debug!(job_id, depth = self.size(), "Job enqueued");
        Ok(())
    }

    /// Wait for the next command. `None` once `cancel` fires; an item already
    /// taken off the channel is always returned.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<DispatchCommand> {
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };

        let command = tokio::select! {
            biased;
            command = rx.recv() => command?,
            _ = cancel.cancelled() => return None,
        };
        drop(rx);

        self.depth.fetch_sub(1, Ordering::SeqCst);
        self.running.insert(command.job_id).await;
        tracing::debug!(job_id = command.job_id, depth = self.size(), "Job dequeued");
        Some(command)
    }

    /// Commands waiting, approximate under concurrent use.
    pub fn size(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}
