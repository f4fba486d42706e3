//! Messaging channel over WebSocket: one JSON text frame per message.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::backoff::sleep_or_cancel;
use crate::cluster::Hub;
use crate::error::Result;
use crate::protocol::{CoordinatorMessage, WorkerMessage};
use crate::worker::WorkerNode;

/// Delays before each reconnect attempt; the last one repeats.
const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];
const MAX_JITTER_MS: u64 = 1000;

pub fn reconnect_delay(attempt: usize) -> Duration {
    RECONNECT_DELAYS[attempt.min(RECONNECT_DELAYS.len() - 1)]
}

/// `GET /hub`: upgrade and serve one worker connection.
pub async fn hub_socket(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(socket, hub))
}

async fn serve_connection(socket: WebSocket, hub: Arc<Hub>) {
    let (connection_id, mut commands) = hub.connect().await;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = commands.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode coordinator message");
                    continue;
                }
            };
            if sink.send(AxumMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(AxumMessage::Text(text)) => match serde_json::from_str::<WorkerMessage>(&text) {
                Ok(message) => hub.handle(&connection_id, message).await,
                Err(e) => tracing::warn!(connection_id = %connection_id, error = %e, "Ignoring malformed worker frame"),
            },
            Ok(AxumMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Worker socket error");
                break;
            }
        }
    }

    writer.abort();
    hub.disconnect(&connection_id).await;
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Keep `node` connected to the coordinator at its configured URL until
/// `cancel` fires, reconnecting with backoff and re-registering each time.
pub async fn run_worker_link(
    node: Arc<WorkerNode>,
    mut outbound: mpsc::Receiver<WorkerMessage>,
    cancel: CancellationToken,
) {
    let url = node.config().coordinator_url.clone();
    let mut attempt = 0usize;

    loop {
        let mut delay = reconnect_delay(attempt);
        if !delay.is_zero() {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS));
            tracing::info!(url = %url, delay_ms = delay.as_millis() as u64, "Reconnecting to coordinator");
        }
        if !sleep_or_cancel(delay, &cancel).await {
            return;
        }

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                tracing::info!(url = %url, "Connected to coordinator");
                attempt = 0;
                match session(socket, &node, &mut outbound, &cancel).await {
                    Ok(SessionEnd::Shutdown) => return,
                    Ok(SessionEnd::Disconnected) => tracing::warn!("Coordinator closed the connection"),
                    Err(e) => tracing::warn!(error = %e, "Connection to coordinator lost"),
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, attempt = attempt + 1, error = %e, "Failed to connect to coordinator");
            }
        }
        attempt += 1;
    }
}

async fn session<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    node: &Arc<WorkerNode>,
    outbound: &mut mpsc::Receiver<WorkerMessage>,
    cancel: &CancellationToken,
) -> Result<SessionEnd>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = socket.split();

    let register = WorkerMessage::RegisterWorker(node.registration().await);
    sink.send(Message::Text(serde_json::to_string(&register)?)).await?;

    // Inbound commands run on their own task: a full queue blocks the
    // reader, never the writer that drains completion reports.
    let reader_cancel = cancel.child_token();
    let mut reader = {
        let node = node.clone();
        let cancel = reader_cancel.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<CoordinatorMessage>(&text) {
                        Ok(message) => node.handle(message, &cancel).await,
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed coordinator frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "Coordinator socket error");
                        break;
                    }
                }
            }
        })
    };

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break SessionEnd::Shutdown;
            }
            _ = &mut reader => break SessionEnd::Disconnected,
            message = outbound.recv() => {
                let Some(message) = message else {
                    break SessionEnd::Shutdown;
                };
                let text = serde_json::to_string(&message)?;
                if let Err(e) = sink.send(Message::Text(text)).await {
                    reader_cancel.cancel();
                    reader.abort();
                    return Err(e.into());
                }
            }
        }
    };

    reader_cancel.cancel();
    reader.abort();
    Ok(end)
}
