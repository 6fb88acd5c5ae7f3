#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use tidepool_server::config::ServerOptions;
use tidepool_server::driver::SharedDriver;
use tidepool_server::matchmaker::{Matchmaker, ReservedSeat};
use tidepool_server::presence::LocalPresence;
use tidepool_server::protocol::{ClientFrame, JoinRoomEnvelope, Protocol};
use tidepool_server::room::{
    BroadcastOptions, ReconnectionWindow, Room, RoomHandle, RoomHandler,
};
use tidepool_server::transport::{LocalClient, LocalClientReceiver, TransportEvent};

/// Options tuned for tests: short seat TTL, quick patches, fast rendezvous.
pub fn test_options() -> ServerOptions {
    ServerOptions {
        seat_reservation_seconds: 2,
        patch_rate_ms: 20,
        max_concurrent_create_wait_secs: 2,
        ..ServerOptions::default()
    }
}

pub async fn single() -> (Arc<LocalPresence>, Matchmaker) {
    single_with(test_options()).await
}

pub async fn single_with(options: ServerOptions) -> (Arc<LocalPresence>, Matchmaker) {
    let presence = Arc::new(LocalPresence::new());
    let driver = Arc::new(SharedDriver::new(presence.clone()));
    let matchmaker = Matchmaker::new(presence.clone(), driver, options).await;
    (presence, matchmaker)
}

/// Several matchmakers sharing one presence: a process fleet in miniature.
pub async fn fleet(size: usize) -> (Arc<LocalPresence>, Vec<Matchmaker>) {
    let presence = Arc::new(LocalPresence::new());
    let mut matchmakers = Vec::with_capacity(size);
    for _ in 0..size {
        let driver = Arc::new(SharedDriver::new(presence.clone()));
        matchmakers.push(Matchmaker::new(presence.clone(), driver, test_options()).await);
    }
    (presence, matchmakers)
}

/// Resolve the local room and bind a channel transport to the reserved seat.
pub async fn connect(
    matchmaker: &Matchmaker,
    seat: &ReservedSeat,
) -> (Arc<LocalClient>, LocalClientReceiver, RoomHandle) {
    let handle = matchmaker
        .local_room(&seat.room.room_id)
        .expect("room should be hosted locally");
    let (client, receiver) = LocalClient::pair();
    handle
        .join(seat.session_id.clone(), client.clone())
        .await
        .expect("join should succeed");
    (client, receiver, handle)
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Next frame with the given protocol code, skipping state patches and
/// full-state frames along the way.
pub async fn expect_frame(receiver: &mut LocalClientReceiver, code: Protocol) -> Bytes {
    for _ in 0..64 {
        let frame = match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await {
            Ok(Some(TransportEvent::Frame(frame))) => frame,
            other => panic!("expected {code:?} frame, transport yielded {other:?}"),
        };
        if frame[0] == code as u8 {
            return frame;
        }
        assert!(
            frame[0] == Protocol::RoomStatePatch as u8 || frame[0] == Protocol::RoomState as u8,
            "unexpected frame code {} while waiting for {code:?}",
            frame[0]
        );
    }
    panic!("no {code:?} frame within 64 frames");
}

pub async fn expect_join_envelope(receiver: &mut LocalClientReceiver) -> JoinRoomEnvelope {
    let frame = expect_frame(receiver, Protocol::JoinRoom).await;
    rmp_serde::from_slice(&frame[1..]).expect("valid JOIN_ROOM envelope")
}

/// Decode a ROOM_DATA frame (server→client frames reuse the client framing).
pub fn decode_room_data(frame: &Bytes) -> (tidepool_server::protocol::MessageType, Option<Value>) {
    match ClientFrame::decode(frame).expect("valid frame") {
        ClientFrame::RoomData { ty, payload } => (ty, payload),
        other => panic!("expected ROOM_DATA, got {other:?}"),
    }
}

pub fn room_data(ty: &str, payload: Value) -> Bytes {
    tidepool_server::protocol::encode_room_data(ty.into(), Some(payload))
}

/// Replicated state of the [`ChatRoom`] test handler.
#[derive(Debug, Default, Serialize)]
pub struct ChatState {
    pub messages: u64,
}

/// Test room: broadcasts "chat" messages, validates "score" payloads,
/// optionally holds seats for reconnection, fails on "explode".
#[derive(Default)]
pub struct ChatRoom {
    state: ChatState,
    reconnection_seconds: u64,
}

#[async_trait]
impl RoomHandler for ChatRoom {
    type State = ChatState;

    fn state(&self) -> Option<&ChatState> {
        Some(&self.state)
    }

    async fn on_create(&mut self, room: &mut Room, options: Value) -> anyhow::Result<()> {
        if let Some(max_clients) = options.get("maxClients").and_then(Value::as_u64) {
            room.set_max_clients(max_clients as u32);
        }
        if options
            .get("noAutoDispose")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            room.set_auto_dispose(false);
        }
        if options
            .get("unlisted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            room.set_unlisted(true);
        }
        self.reconnection_seconds = options
            .get("reconnectionSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        room.accept_message("chat");
        room.accept_message("explode");
        room.accept_message_with("score", |payload| {
            payload
                .as_u64()
                .map(|value| json!({ "value": value }))
                .ok_or_else(|| anyhow::anyhow!("score must be a number"))
        });
        Ok(())
    }

    async fn on_message(
        &mut self,
        room: &mut Room,
        session_id: &str,
        ty: &tidepool_server::protocol::MessageType,
        payload: Value,
    ) -> anyhow::Result<()> {
        match ty.to_string().as_str() {
            "chat" => {
                self.state.messages += 1;
                room.broadcast("chat", Some(payload), BroadcastOptions::except(session_id));
            }
            "score" => {
                room.send(session_id, "score-ack", Some(payload));
            }
            "explode" => anyhow::bail!("handler blew up"),
            _ => {}
        }
        Ok(())
    }

    async fn on_leave(
        &mut self,
        room: &mut Room,
        session_id: &str,
        consented: bool,
    ) -> anyhow::Result<()> {
        if !consented && self.reconnection_seconds > 0 {
            room.allow_reconnection(
                session_id,
                ReconnectionWindow::Seconds(self.reconnection_seconds),
            );
        }
        Ok(())
    }
}
