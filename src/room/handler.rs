use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::Room;
use crate::clock::TimerId;
use crate::errors::RoomException;
use crate::protocol::MessageType;
use crate::serializer::{JsonSerializer, Serializer};

/// How long a disconnected client's seat is held before the room gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionWindow {
    Seconds(u64),
    /// Held until the handler calls `Room::reject_reconnection` (or the
    /// client returns).
    Manual,
}

impl ReconnectionWindow {
    pub(crate) fn timer(self) -> Option<Duration> {
        match self {
            Self::Seconds(seconds) => Some(Duration::from_secs(seconds)),
            Self::Manual => None,
        }
    }
}

/// User-supplied room behavior. Every hook is optional and may suspend; the
/// room task wraps each one so a failure is routed to
/// [`on_uncaught_exception`](Self::on_uncaught_exception) instead of
/// unwinding the room.
#[async_trait]
pub trait RoomHandler: Send + Sized + 'static {
    /// Authoritative state replicated to clients. Use `()` for stateless
    /// rooms.
    type State: Serialize + Send + 'static;

    /// Serializer used for full-state and patch frames.
    fn serializer(&self) -> Box<dyn Serializer<Self::State>> {
        Box::new(JsonSerializer::new())
    }

    /// Current state, or `None` before initialization (patching is skipped).
    fn state(&self) -> Option<&Self::State> {
        None
    }

    /// Room setup: configure `max_clients`, patch rate, accepted messages,
    /// simulation cadence; initialize state.
    async fn on_create(&mut self, room: &mut Room, options: Value) -> anyhow::Result<()> {
        let _ = (room, options);
        Ok(())
    }

    /// Authenticate a consuming seat. Returning an error refuses the join;
    /// the returned value becomes `client.auth`. Default: accept, keeping
    /// the auth captured at reservation time.
    async fn on_auth(
        &mut self,
        room: &mut Room,
        session_id: &str,
        options: &Value,
        auth: &Value,
    ) -> anyhow::Result<Value> {
        let _ = (room, session_id, options);
        Ok(auth.clone())
    }

    async fn on_join(
        &mut self,
        room: &mut Room,
        session_id: &str,
        options: Value,
        auth: Value,
    ) -> anyhow::Result<()> {
        let _ = (room, session_id, options, auth);
        Ok(())
    }

    /// A typed message arrived from `session_id`, already validated by any
    /// registered validator. Only types accepted via
    /// [`Room::accept_message`]/[`Room::accept_wildcard`] reach this hook.
    async fn on_message(
        &mut self,
        room: &mut Room,
        session_id: &str,
        ty: &MessageType,
        payload: Value,
    ) -> anyhow::Result<()> {
        let _ = (room, session_id, ty, payload);
        Ok(())
    }

    /// A typed raw-bytes message arrived from `session_id`.
    async fn on_message_bytes(
        &mut self,
        room: &mut Room,
        session_id: &str,
        ty: &MessageType,
        data: Vec<u8>,
    ) -> anyhow::Result<()> {
        let _ = (room, session_id, ty, data);
        Ok(())
    }

    /// `session_id` left (or its transport dropped). Call
    /// [`Room::allow_reconnection`] here to hold the seat for a comeback.
    async fn on_leave(
        &mut self,
        room: &mut Room,
        session_id: &str,
        consented: bool,
    ) -> anyhow::Result<()> {
        let _ = (room, session_id, consented);
        Ok(())
    }

    /// A held session returned within its grace window.
    async fn on_reconnect(&mut self, room: &mut Room, session_id: &str) -> anyhow::Result<()> {
        let _ = (room, session_id);
        Ok(())
    }

    /// A held session's grace window elapsed, or the hold was rejected; the
    /// seat is reaped right after this returns.
    async fn on_reconnection_rejected(
        &mut self,
        room: &mut Room,
        session_id: &str,
    ) -> anyhow::Result<()> {
        let _ = (room, session_id);
        Ok(())
    }

    /// Simulation tick, at the cadence set by
    /// [`Room::set_simulation_interval`]. `delta` is the clamped clock delta.
    async fn on_simulation(&mut self, room: &mut Room, delta: Duration) -> anyhow::Result<()> {
        let _ = (room, delta);
        Ok(())
    }

    /// A clock timer scheduled via [`Room::schedule_timeout`] or
    /// [`Room::schedule_interval`] fired.
    async fn on_timer(&mut self, room: &mut Room, timer: TimerId) -> anyhow::Result<()> {
        let _ = (room, timer);
        Ok(())
    }

    /// Runs right before the serializer computes a patch.
    fn on_before_patch(&mut self) {}

    /// Graceful shutdown notice. Default: disconnect everyone with `code`.
    async fn on_before_shutdown(&mut self, room: &mut Room, code: u16) {
        room.disconnect(code);
    }

    /// Room teardown; the listing is already gone when this runs.
    async fn on_dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whitelisted dynamic dispatch target for `remote_room_call` methods not
    /// handled by the runtime itself.
    async fn on_call(&mut self, room: &mut Room, method: &str, args: Value) -> anyhow::Result<Value> {
        let _ = (room, args);
        anyhow::bail!("method `{method}` is not callable on this room")
    }

    /// Last stop for wrapped hook failures. Default: log and continue; the
    /// room keeps running unless the handler escalates to
    /// [`Room::disconnect`].
    fn on_uncaught_exception(&mut self, room: &mut Room, error: &RoomException) {
        let _ = room;
        tracing::error!(
            method = error.method_name(),
            %error,
            "Uncaught exception in room handler"
        );
    }
}
