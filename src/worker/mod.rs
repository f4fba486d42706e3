//! Worker-side execution engine.
//!
//! A worker receives dispatch commands from the coordinator, buffers them in
//! a bounded queue and runs them on a fixed-size pool of HTTP execution slots:
//! - **Queue**: [`JobQueue`] applies backpressure to the inbound link when full
//! - **Pool**: [`ExecutionPool`] bounds concurrent outbound calls
//! - **Executor**: [`HttpExecutor`] performs one call with timeout and retries
//! - **Heartbeat**: [`HeartbeatSender`] reports capacity every interval
//!
//! # Message Flow
//!
//! 1. `ExecuteJob` arrives and is enqueued (blocking while the queue is full)
//! 2. A pool slot acquires a permit, dequeues and executes the command
//! 3. The slot reports `ReportJobCompletion`, then `UpdateStatus`
//! 4. `HeartbeatCheck` is answered immediately with a `Heartbeat`

pub mod capacity;
pub mod executor;
pub mod heartbeat;
pub mod pool;
pub mod queue;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::protocol::{CoordinatorMessage, WorkerMessage, WorkerRegistration};

pub use capacity::CapacityProbe;
pub use executor::HttpExecutor;
pub use heartbeat::HeartbeatSender;
pub use pool::ExecutionPool;
pub use queue::{JobQueue, RunningJobs};

/// Outbound buffer between the worker and its link to the coordinator.
pub const OUTBOUND_BUFFER: usize = 256;

/// One worker process: queue, pool, heartbeat and the messages it exchanges
/// with the coordinator. Transport-agnostic; a link feeds [`WorkerNode::handle`]
/// and drains the receiver returned by [`WorkerNode::new`].
pub struct WorkerNode {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    probe: Arc<CapacityProbe>,
    pool: Arc<ExecutionPool>,
    outbound: mpsc::Sender<WorkerMessage>,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig) -> Result<(Self, mpsc::Receiver<WorkerMessage>)> {
        config.validate()?;
        let executor = HttpExecutor::new(config.executor.clone())?;
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let probe = Arc::new(CapacityProbe::new(config.max_concurrent_jobs, queue.clone()));
        let pool = Arc::new(ExecutionPool::new(
            config.max_concurrent_jobs,
            queue.clone(),
            executor,
            probe.clone(),
            outbound.clone(),
        ));

        let node = Self {
            config,
            queue,
            probe,
            pool,
            outbound,
        };
        Ok((node, outbound_rx))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Payload for `RegisterWorker`, sent first on every new connection.
    pub async fn registration(&self) -> WorkerRegistration {
        WorkerRegistration {
            name: self.config.instance_name.clone(),
            host: self.config.host.clone(),
            ip_address: self.config.ip_address.clone(),
            port: self.config.port,
            capacity: self.probe.snapshot().await,
            version: self.config.version.clone(),
        }
    }

    /// Start the execution pool and the heartbeat timer.
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        tracing::info!(
            name = %self.config.instance_name,
            slots = self.config.max_concurrent_jobs,
            queue_capacity = self.config.queue_capacity,
            "Starting worker"
        );

        let mut handles = self.pool.start(cancel);

        let heartbeat = HeartbeatSender::new(self.config.heartbeat_interval);
        let probe = self.probe.clone();
        let tx = self.outbound.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            heartbeat.run(probe, tx, cancel).await;
        }));

        handles
    }

    /// Apply one message from the coordinator. `ExecuteJob` waits while the
    /// queue is full.
    pub async fn handle(&self, message: CoordinatorMessage, cancel: &CancellationToken) {
        match message {
            CoordinatorMessage::ExecuteJob(command) => {
                let job_id = command.job_id;
                tracing::info!(job_id, job_name = %command.job_name, attempt = command.attempt, "Job received");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::warn!(job_id, "Shutting down, job not enqueued");
                    }
                    queued = self.queue.enqueue(command) => {
                        if let Err(e) = queued {
                            tracing::error!(job_id, error = %e, "Failed to enqueue job");
                        }
                    }
                }
            }
            CoordinatorMessage::HeartbeatCheck => {
                let heartbeat = self.probe.heartbeat().await;
                if self.outbound.send(heartbeat).await.is_err() {
                    tracing::warn!("Outbound channel closed, heartbeat dropped");
                }
            }
        }
    }
}
