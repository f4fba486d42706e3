use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::cluster::dispatch::WorkerChannel;
use crate::cluster::registry::MembershipRegistry;
use crate::error::{FleetError, Result};
use crate::protocol::{CoordinatorMessage, DispatchCommand, ExecutionOutcome, WorkerMessage, WorkerRegistration};
use crate::scheduler::JobStore;

/// Outbound buffer per connection.
pub const CONNECTION_BUFFER: usize = 256;

struct Connection {
    tx: mpsc::Sender<CoordinatorMessage>,
    /// Last registration payload, kept to re-admit an evicted worker.
    registration: Option<WorkerRegistration>,
}

/// Coordinator end of the messaging channel.
///
/// Transports hand every inbound frame to [`Hub::handle`] and drain the
/// receiver returned by [`Hub::connect`]. The hub keeps the registry and the
/// execution history in step with what workers report.
pub struct Hub {
    registry: Arc<MembershipRegistry>,
    store: Arc<dyn JobStore>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl Hub {
    pub fn new(registry: Arc<MembershipRegistry>, store: Arc<dyn JobStore>) -> Self {
        Self {
            registry,
            store,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    /// Open a connection. The returned id becomes the worker id once the
    /// peer registers.
    pub async fn connect(&self) -> (String, mpsc::Receiver<CoordinatorMessage>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        self.connections.lock().await.insert(
            id.clone(),
            Connection {
                tx,
                registration: None,
            },
        );
        tracing::debug!(connection_id = %id, "Connection opened");
        (id, rx)
    }

    /// Transport-detected disconnect.
    pub async fn disconnect(&self, connection_id: &str) {
        self.connections.lock().await.remove(connection_id);
        self.registry.unregister(connection_id).await;
        tracing::info!(connection_id, "Connection closed");
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn handle(&self, connection_id: &str, message: WorkerMessage) {
        match message {
            WorkerMessage::RegisterWorker(registration) => {
                if let Some(conn) = self.connections.lock().await.get_mut(connection_id) {
                    conn.registration = Some(registration.clone());
                }
                self.registry.register(connection_id, registration).await;
            }
            WorkerMessage::Heartbeat {
                capacity,
                running_job_ids,
                timestamp,
            } => {
                tracing::debug!(
                    worker_id = connection_id,
                    running = capacity.current_running,
                    jobs = ?running_job_ids,
                    "Heartbeat received"
                );
                if !self.registry.heartbeat(connection_id, capacity.clone(), timestamp).await
                    && self.readmit(connection_id).await
                {
                    self.registry.heartbeat(connection_id, capacity, timestamp).await;
                }
            }
            WorkerMessage::UpdateStatus(capacity) => {
                if !self.registry.update_status(connection_id, capacity.clone()).await
                    && self.readmit(connection_id).await
                {
                    self.registry.update_status(connection_id, capacity).await;
                }
            }
            WorkerMessage::ReportJobCompletion(outcome) => {
                self.complete(connection_id, outcome).await;
            }
        }
    }

    async fn complete(&self, connection_id: &str, mut outcome: ExecutionOutcome) {
        self.registry.release_slot(connection_id).await;
        outcome.worker_id = Some(connection_id.to_string());

        tracing::info!(
            job_id = outcome.job_id,
            worker_id = connection_id,
            success = outcome.success,
            status_code = ?outcome.status_code,
            duration_ms = outcome.duration_ms,
            "Job completion reported"
        );

        let job_id = outcome.job_id;
        if let Err(e) = self.store.record_outcome(outcome.bounded()).await {
            tracing::error!(job_id, worker_id = connection_id, error = %e, "Failed to record execution outcome");
        }
    }

    /// Register again from the stored payload. False if the connection never
    /// registered.
    async fn readmit(&self, connection_id: &str) -> bool {
        let registration = self
            .connections
            .lock()
            .await
            .get(connection_id)
            .and_then(|c| c.registration.clone());

        match registration {
            Some(registration) => {
                tracing::info!(worker_id = connection_id, "Re-admitting evicted worker");
                self.registry.register(connection_id, registration).await;
                true
            }
            None => {
                tracing::warn!(connection_id, "Message from unregistered connection ignored");
                false
            }
        }
    }

    /// Ask every registered connection for a heartbeat. Returns how many
    /// probes were queued.
    pub async fn broadcast_heartbeat_check(&self) -> usize {
        let connections = self.connections.lock().await;
        let mut sent = 0;
        for (id, conn) in connections.iter().filter(|(_, c)| c.registration.is_some()) {
            match conn.tx.try_send(CoordinatorMessage::HeartbeatCheck) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(connection_id = %id, error = %e, "Heartbeat check not queued"),
            }
        }
        sent
    }
}

#[async_trait]
impl WorkerChannel for Hub {
    async fn send_command(&self, worker_id: &str, command: DispatchCommand) -> Result<()> {
        let tx = self
            .connections
            .lock()
            .await
            .get(worker_id)
            .map(|c| c.tx.clone())
            .ok_or_else(|| FleetError::WorkerNotFound(worker_id.to_string()))?;

        tx.send(CoordinatorMessage::ExecuteJob(command))
            .await
            .map_err(|_| FleetError::ChannelClosed(worker_id.to_string()))
    }
}
