use std::time::Duration;

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use journey_common::SessionId;
use tokio::time::Instant;

use super::api::{ApiError, SharedState};
use super::sse::EventsQuery;
use crate::channel::Subscription;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Upgrades to a WebSocket carrying the session's events as JSON text frames.
///
/// The subscription is taken before the upgrade, so an unknown session or a
/// bad cursor is reported as a plain HTTP error.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let subscription = state.engine.subscribe(id, query.after.unwrap_or(0))?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, subscription))
        .into_response())
}

async fn handle_socket(socket: WebSocket, subscription: Subscription) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, subscription).await;
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines event forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
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
                    tracing::debug!("websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            next = subscription.next() => {
                match next {
                    Some(Ok(event)) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!(sequence = event.sequence, error = %e, "failed to encode event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(cursor = subscription.cursor(), error = %e, "websocket subscriber fell behind");
                        break;
                    }
                    None => break,
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
