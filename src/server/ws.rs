use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::SharedState;
use crate::pipeline::BoardEvent;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Only forward events of this pipeline.
    pub pipeline: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let rx = state.hub.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, params.pipeline))
}

async fn handle_socket(
    socket: WebSocket,
    rx: broadcast::Receiver<BoardEvent>,
    pipeline: Option<String>,
) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, pipeline).await;
}

/// Serialize an event for the wire, or `None` when it is filtered out.
pub fn encode_event(event: &BoardEvent, pipeline: Option<&str>) -> Option<String> {
    if pipeline.is_some_and(|p| event.pipeline().as_str() != p) {
        return None;
    }
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize board event");
            None
        }
    }
}

/// Combines event forwarding, client message receiving and periodic
/// ping/pong health checking in one select loop. If no Pong arrives within
/// [`PONG_TIMEOUT`] after a Ping, the connection is considered dead.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<BoardEvent>,
    pipeline: Option<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("websocket client stopped answering pings");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let Some(json) = encode_event(&event, pipeline.as_deref()) else {
                            continue;
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The next Recomputed snapshot supersedes what was missed.
                        tracing::debug!(skipped, "websocket client lagged behind");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
