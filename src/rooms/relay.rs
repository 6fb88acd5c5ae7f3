use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::room::{BroadcastOptions, ReconnectionWindow, Room, RoomHandler};

/// Replicated roster of connected sessions.
#[derive(Debug, Default, Serialize)]
pub struct RelayState {
    sessions: Vec<String>,
}

/// A generic relay: every message a client sends is re-broadcast to everyone
/// else, and the roster of sessions is replicated as room state. Useful as a
/// zero-logic room type for client-authoritative games.
#[derive(Default)]
pub struct RelayRoom {
    state: RelayState,
    reconnection_seconds: u64,
}

#[async_trait]
impl RoomHandler for RelayRoom {
    type State = RelayState;

    fn state(&self) -> Option<&RelayState> {
        Some(&self.state)
    }

    async fn on_create(&mut self, room: &mut Room, options: Value) -> anyhow::Result<()> {
        if let Some(max_clients) = options.get("maxClients").and_then(Value::as_u64) {
            room.set_max_clients(max_clients as u32);
        }
        if let Some(metadata) = options.get("metadata") {
            room.set_metadata(metadata.clone());
        }
        self.reconnection_seconds = options
            .get("reconnectionSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        room.accept_wildcard();
        Ok(())
    }

    async fn on_join(
        &mut self,
        _room: &mut Room,
        session_id: &str,
        _options: Value,
        _auth: Value,
    ) -> anyhow::Result<()> {
        self.state.sessions.push(session_id.to_string());
        Ok(())
    }

    async fn on_message(
        &mut self,
        room: &mut Room,
        session_id: &str,
        ty: &crate::protocol::MessageType,
        payload: Value,
    ) -> anyhow::Result<()> {
        room.broadcast(
            ty.clone(),
            Some(payload),
            BroadcastOptions::except(session_id),
        );
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
            return Ok(());
        }
        self.state.sessions.retain(|session| session != session_id);
        Ok(())
    }

    async fn on_reconnect(&mut self, _room: &mut Room, _session_id: &str) -> anyhow::Result<()> {
        // roster never dropped the session while the seat was held
        Ok(())
    }

    async fn on_reconnection_rejected(
        &mut self,
        _room: &mut Room,
        session_id: &str,
    ) -> anyhow::Result<()> {
        self.state.sessions.retain(|session| session != session_id);
        Ok(())
    }
}
