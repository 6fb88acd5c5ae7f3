use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::errors::RoomError;
use crate::protocol::{RoomId, SessionId};
use crate::transport::ClientRef;

/// Commands serviced by a room's task loop. Everything that mutates room
/// state arrives here, so mutations serialize on one logical executor.
pub(crate) enum RoomCommand {
    ReserveSeat {
        session_id: SessionId,
        options: Value,
        auth: Value,
        allow_reconnection: bool,
        reply: oneshot::Sender<bool>,
    },
    Join {
        session_id: SessionId,
        reference: Arc<dyn ClientRef>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Reconnect {
        token: String,
        reference: Arc<dyn ClientRef>,
        reply: oneshot::Sender<Result<SessionId, RoomError>>,
    },
    Message {
        session_id: SessionId,
        data: Bytes,
    },
    Leave {
        session_id: SessionId,
        code: u16,
    },
    RemoteCall {
        method: String,
        args: Value,
        reply: oneshot::Sender<Result<Value, RoomError>>,
    },
    SeatExpired {
        session_id: SessionId,
    },
    ReconnectionExpired {
        token: String,
    },
    AutoDisposeCheck {
        generation: u64,
    },
    BeforeShutdown {
        code: u16,
    },
}

/// Cheaply cloneable handle to a running room task. The matchmaker keeps one
/// per locally hosted room; transports resolve it to bind connections.
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: RoomId,
    pub room_name: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub(crate) fn new(
        room_id: RoomId,
        room_name: String,
        tx: mpsc::UnboundedSender<RoomCommand>,
    ) -> Self {
        Self {
            room_id,
            room_name,
            tx,
        }
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.room_id.clone())
    }

    pub async fn reserve_seat(
        &self,
        session_id: SessionId,
        options: Value,
        auth: Value,
        allow_reconnection: bool,
    ) -> Result<bool, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::ReserveSeat {
                session_id,
                options,
                auth,
                allow_reconnection,
                reply,
            })
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())
    }

    pub async fn join(
        &self,
        session_id: SessionId,
        reference: Arc<dyn ClientRef>,
    ) -> Result<(), RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Join {
                session_id,
                reference,
                reply,
            })
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    pub async fn reconnect(
        &self,
        token: String,
        reference: Arc<dyn ClientRef>,
    ) -> Result<SessionId, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Reconnect {
                token,
                reference,
                reply,
            })
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Deliver a raw client frame; silently dropped once the room is gone.
    pub fn send_message(&self, session_id: SessionId, data: Bytes) {
        let _ = self.tx.send(RoomCommand::Message { session_id, data });
    }

    /// Signal that a client's transport closed with `code`.
    pub fn leave(&self, session_id: SessionId, code: u16) {
        let _ = self.tx.send(RoomCommand::Leave { session_id, code });
    }

    /// Invoke a whitelisted room method (`_reserveSeat`, `lock`, custom
    /// handler calls, …). This is the local end of the `$roomId` IPC bus.
    pub async fn remote_call(&self, method: &str, args: Value) -> Result<Value, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::RemoteCall {
                method: method.to_string(),
                args,
                reply,
            })
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Graceful-shutdown entry: lock, run `on_before_shutdown`, disconnect.
    pub fn before_shutdown(&self, code: u16) {
        let _ = self.tx.send(RoomCommand::BeforeShutdown { code });
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle")
            .field("room_id", &self.room_id)
            .field("room_name", &self.room_name)
            .finish_non_exhaustive()
    }
}
