//! WebSocket endpoint.
//!
//! Each connection runs one task that multiplexes two streams: frames from
//! the client, handed to its [`ConnectionSession`], and events queued for it
//! by the hub, written to the socket.

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::session::ConnectionSession;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Browsers cannot set headers on an upgrade request.
    token: Option<String>,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let token = bearer_token(&headers).map(str::to_string).or(params.token);
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut session = ConnectionSession::new(state.hub.clone(), tx);
    let session_id = match session.authenticate(&state.tokens, token.as_deref()).await {
        Ok(session_id) => session_id,
        Err(e) => {
            let close = CloseFrame {
                code: close_code::POLICY,
                reason: e.client_message().into(),
            };
            let _ = ws_tx.send(WsMessage::Close(Some(close))).await;
            return;
        }
    };

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => session.handle_frame(&text).await,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session = %session_id, error = %e, "Socket read failed");
                        break;
                    }
                }
            }
        }
    }

    session.close().await;
}
