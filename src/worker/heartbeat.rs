use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::WorkerMessage;
use crate::worker::capacity::CapacityProbe;

/// Sends an unsolicited heartbeat on a fixed interval.
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run until cancelled or until the link's receiver is dropped.
    pub async fn run(&self, probe: Arc<CapacityProbe>, tx: mpsc::Sender<WorkerMessage>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let heartbeat = probe.heartbeat().await;
                    if tx.send(heartbeat).await.is_err() {
                        // Receiver dropped, stop sending
                        break;
                    }
                }
            }
        }
        tracing::debug!("Heartbeat timer stopped");
    }
}
