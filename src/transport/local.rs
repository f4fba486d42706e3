//! In-process messaging channel between a worker node and the hub.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cluster::Hub;
use crate::protocol::WorkerMessage;
use crate::worker::WorkerNode;

/// Attach `node` to `hub`, register it and pump messages both ways until
/// `cancel` fires. Returns the connection id, which is the worker id.
pub async fn connect_local(
    hub: Arc<Hub>,
    node: Arc<WorkerNode>,
    mut outbound: mpsc::Receiver<WorkerMessage>,
    cancel: CancellationToken,
) -> String {
    let (connection_id, mut inbound) = hub.connect().await;
    hub.handle(&connection_id, WorkerMessage::RegisterWorker(node.registration().await))
        .await;

    {
        let hub = hub.clone();
        let id = connection_id.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = outbound.recv() => match message {
                        Some(message) => hub.handle(&id, message).await,
                        None => break,
                    },
                }
            }
            hub.disconnect(&id).await;
        });
    }

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => node.handle(message, &cancel).await,
                    None => break,
                },
            }
        }
    });

    connection_id
}
