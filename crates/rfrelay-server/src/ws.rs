//! WebSocket endpoint for live readings.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::{Frame, SubscriberRegistry};
use crate::state::AppState;

/// WebSocket upgrade handler for live subscribers.
pub async fn ws_readings(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.to_string());
    ws.on_upgrade(move |socket| handle_subscriber(socket, state, peer))
}

async fn handle_subscriber(socket: WebSocket, state: AppState, peer: Option<String>) {
    let (id, frames) = state.registry.connect(peer);
    let (sender, receiver) = socket.split();

    pump_frames(
        &state.registry,
        &id,
        frames,
        sender,
        receiver,
        state.config.send_timeout,
    )
    .await;
}

/// Pump broadcast frames to one client until either side goes away, then
/// unregister it.
///
/// A send that does not finish within `send_timeout` drops the client.
pub(crate) async fn pump_frames<Tx, Rx, E>(
    registry: &SubscriberRegistry,
    id: &str,
    mut frames: mpsc::Receiver<Frame>,
    mut sender: Tx,
    mut receiver: Rx,
    send_timeout: Duration,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                match tokio::time::timeout(send_timeout, sender.send(Message::Text(frame.to_string()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(subscriber_id = %id, error = %e, "websocket send failed");
                        break;
                    }
                    Err(_) => {
                        warn!(subscriber_id = %id, timeout_ms = send_timeout.as_millis() as u64, "websocket send timed out");
                        break;
                    }
                }
            }

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                // Inbound data is ignored; pings are answered by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscriber_id = %id, error = %e, "websocket receive failed");
                    break;
                }
            },
        }
    }

    registry.unregister(id);
    // Bounded so a stalled peer cannot hold the task open.
    let _ = tokio::time::timeout(send_timeout, sender.close()).await;
}
