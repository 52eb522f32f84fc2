//! `WS /ws/{cid}`: attaches to the [`choir_broadcast::BroadcastHub`] for
//! one conversation and forwards every serialized event verbatim. The
//! client may send `"ping"` and gets `"pong"` back; the server also
//! pings after 30s of client silence to detect dead connections.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

const IDLE_PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn upgrade(State(state): State<AppState>, Path(conversation_id): Path<String>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, conversation_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (subscriber_id, mut events) = state.broadcast.attach(&conversation_id);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(json) => {
                        if sender.send(WsMessage::Text(json.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) if text == "ping" => {
                        if sender.send(WsMessage::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = tokio::time::sleep(IDLE_PING_INTERVAL) => {
                if sender.send(WsMessage::Text("ping".into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.broadcast.detach(&conversation_id, subscriber_id);
}
