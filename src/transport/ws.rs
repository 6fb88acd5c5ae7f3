//! WebSocket transport adapter.
//!
//! Clients connect to `GET /{roomId}?sessionId=<reserved>` after matchmaking,
//! or without a `sessionId` and a `RECONNECT` first frame to resume a held
//! session. Frames are pumped verbatim between the socket and the room task;
//! the socket close code becomes the room's leave code.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use super::{ClientRef, LocalClient, LocalClientReceiver, TransportEvent};
use crate::matchmaker::Matchmaker;
use crate::protocol::{self, ClientFrame, ErrorCode, SessionId, WS_CLOSE_WITH_ERROR};
use crate::room::RoomHandle;

/// Router exposing the room connection endpoint.
pub fn router(matchmaker: Matchmaker) -> Router {
    Router::new()
        .route("/{room_id}", get(ws_handler))
        .with_state(matchmaker)
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    State(matchmaker): State<Matchmaker>,
) -> Response {
    let Some(handle) = matchmaker.local_room(&room_id) else {
        return (StatusCode::NOT_FOUND, "room not found on this process").into_response();
    };
    ws.on_upgrade(move |socket| serve_connection(socket, handle, query.session_id))
}

async fn serve_connection(socket: WebSocket, handle: RoomHandle, session_id: Option<String>) {
    let (sink, mut stream) = socket.split();
    let (client, receiver) = LocalClient::pair();
    tokio::spawn(pump_outbound(receiver, sink));

    // Bind the socket to a session: a reserved seat, or a RECONNECT frame.
    let Some(session_id) = bind_session(&handle, client.clone(), &mut stream, session_id).await
    else {
        client.close(WS_CLOSE_WITH_ERROR);
        return;
    };

    let mut close_code = WS_CLOSE_WITH_ERROR;
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(data)) => handle.send_message(session_id.clone(), data),
            Ok(Message::Close(frame)) => {
                close_code = frame.map_or(WS_CLOSE_WITH_ERROR, |frame| frame.code);
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    handle.leave(session_id, close_code);
}

/// Forward room frames to the socket; a close event ends the connection.
async fn pump_outbound(mut receiver: LocalClientReceiver, mut sink: SplitSink<WebSocket, Message>) {
    while let Some(event) = receiver.recv().await {
        match event {
            TransportEvent::Frame(frame) => {
                if sink.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }
            TransportEvent::Close(code) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: Utf8Bytes::from_static(""),
                    })))
                    .await;
                break;
            }
        }
    }
}

async fn bind_session(
    handle: &RoomHandle,
    client: Arc<LocalClient>,
    stream: &mut SplitStream<WebSocket>,
    session_id: Option<String>,
) -> Option<SessionId> {
    match session_id {
        Some(session_id) => {
            match handle.join(session_id.clone(), client.clone()).await {
                Ok(()) => Some(session_id),
                Err(error) => {
                    client.send(protocol::encode_error(
                        ErrorCode::MatchmakeExpired.value(),
                        &error.to_string(),
                    ));
                    tracing::debug!(room_id = %handle.room_id, %error, "Rejected websocket join");
                    None
                }
            }
        }
        None => {
            let first = stream.next().await?;
            let Ok(Message::Binary(data)) = first else {
                return None;
            };
            let Ok(ClientFrame::Reconnect { token }) = ClientFrame::decode(&data) else {
                return None;
            };
            match handle.reconnect(token, client.clone()).await {
                Ok(session_id) => Some(session_id),
                Err(error) => {
                    client.send(protocol::encode_error(
                        ErrorCode::MatchmakeExpired.value(),
                        &error.to_string(),
                    ));
                    tracing::debug!(room_id = %handle.room_id, %error, "Rejected websocket reconnect");
                    None
                }
            }
        }
    }
}
