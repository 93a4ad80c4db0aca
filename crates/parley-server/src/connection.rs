use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use parley_core::{ConnectionId, ServerEvent};
use tokio::sync::mpsc;

use crate::gateway::Inbound;
use crate::registry::ConnectionRegistry;

/// Pump one WebSocket: outbound events to the socket with periodic pings,
/// inbound text frames to the dispatcher. Ends with a `Disconnect` so
/// teardown is ordered after every frame this connection already sent.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<ServerEvent>,
    registry: Arc<ConnectionRegistry>,
    inbound: mpsc::Sender<(ConnectionId, Inbound)>,
    heartbeat_interval: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward events from channel to WebSocket + periodic ping
    let writer_cid = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(connection_id = %writer_cid, error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "Sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader task: forward text frames to the dispatcher, track liveness
    let reader_cid = connection_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader_inbound = inbound.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            reader_registry.record_activity(&reader_cid);
            match msg {
                WsMessage::Text(text) => {
                    let frame = Inbound::Frame(text.to_string());
                    if reader_inbound.send((reader_cid.clone(), frame)).await.is_err() {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                // axum answers pings; pongs only matter for liveness
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if inbound.send((connection_id.clone(), Inbound::Disconnect)).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Dispatcher gone before disconnect");
    }
}
