use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use crate::protocol::{self, MessageType, SessionId};
use crate::transport::ClientRef;

/// Connection lifecycle of a session inside its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Joining,
    Joined,
    Reconnected,
    Leaving,
}

/// A joined (or held) client session. The room owns the session list; the
/// session holds only the transport handle, never a reference back into the
/// room.
pub struct ClientSession {
    pub session_id: SessionId,
    pub reconnection_token: String,
    pub auth: Value,
    pub user_data: Value,
    pub state: ClientState,
    reference: Arc<dyn ClientRef>,
}

impl ClientSession {
    pub(crate) fn new(
        session_id: SessionId,
        reconnection_token: String,
        reference: Arc<dyn ClientRef>,
    ) -> Self {
        Self {
            session_id,
            reconnection_token,
            auth: Value::Null,
            user_data: Value::Null,
            state: ClientState::Joining,
            reference,
        }
    }

    /// Whether broadcasts include this client.
    pub fn is_active(&self) -> bool {
        matches!(self.state, ClientState::Joined | ClientState::Reconnected)
    }

    pub(crate) fn replace_reference(&mut self, reference: Arc<dyn ClientRef>) {
        self.reference = reference;
    }

    pub(crate) fn send_raw(&self, frame: Bytes) {
        self.reference.send(frame);
    }

    /// Send a typed message to this client alone.
    pub fn send(&self, ty: impl Into<MessageType>, payload: Option<Value>) {
        self.send_raw(protocol::encode_room_data(ty.into(), payload));
    }

    /// Send a typed raw-bytes message to this client alone.
    pub fn send_bytes(&self, ty: impl Into<MessageType>, data: &[u8]) {
        self.send_raw(protocol::encode_room_data_bytes(ty.into(), data));
    }

    /// Send an `ERROR` frame.
    pub fn send_error(&self, code: u16, message: &str) {
        self.send_raw(protocol::encode_error(code, message));
    }

    pub(crate) fn close(&self, code: u16) {
        self.reference.close(code);
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
