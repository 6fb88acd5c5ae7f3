//! Error taxonomy for matchmaking, room runtime and coordination failures.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::ErrorCode;

/// Failures surfaced by the presence layer.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("value at `{0}` is not an integer")]
    NotAnInteger(String),
    #[error("presence backend has shut down")]
    Shutdown,
    #[error("presence i/o failure: {0}")]
    Io(String),
}

/// Matchmaking refusals and infrastructure failures, surfaced to the
/// HTTP caller as `{code, message}`.
#[derive(Debug, Error)]
pub enum MatchmakeError {
    #[error("no room handler registered for `{0}`")]
    NoHandler(String),
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    #[error("seat reservation refused: {0}")]
    SeatReservation(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("remote process did not reply within {0:?}")]
    IpcTimeout(Duration),
    #[error("room creation failed: {0}")]
    Matchmaking(String),
    #[error("reconnection token invalid or expired")]
    ReconnectionExpired,
    #[error("process is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Presence(#[from] PresenceError),
}

impl MatchmakeError {
    /// Wire error code for the `{code, message}` payload.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoHandler(_) => ErrorCode::MatchmakeNoHandler,
            Self::RoomNotFound(_) => ErrorCode::MatchmakeInvalidRoomId,
            Self::SeatReservation(_) => ErrorCode::MatchmakeInvalidCriteria,
            Self::Auth(_) => ErrorCode::AuthFailed,
            Self::ReconnectionExpired => ErrorCode::MatchmakeExpired,
            Self::IpcTimeout(_) | Self::Presence(_) => ErrorCode::MatchmakeUnhandled,
            Self::Matchmaking(_) | Self::ShuttingDown => ErrorCode::ApplicationError,
        }
    }

    /// Whether the failure is the caller's (4xx) or the server's (5xx).
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::IpcTimeout(_) | Self::Presence(_) | Self::ShuttingDown
        )
    }
}

/// Failures produced by a room while servicing a command.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room `{0}` is no longer available")]
    Unavailable(String),
    #[error("seat for session `{0}` expired or was never reserved")]
    SeatExpired(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("reconnection token not recognized")]
    BadReconnectionToken,
    #[error("method `{0}` is not callable on this room")]
    UnknownMethod(String),
    #[error("room handler failed: {0}")]
    Handler(String),
}

/// A wrapped user-code failure, routed to `on_uncaught_exception` instead of
/// unwinding the room loop. The variant names the hook that failed.
#[derive(Debug, Error)]
pub enum RoomException {
    #[error("onCreate failed: {0}")]
    OnCreate(#[source] anyhow::Error),
    #[error("onAuth failed: {0}")]
    OnAuth(#[source] anyhow::Error),
    #[error("onJoin failed: {0}")]
    OnJoin(#[source] anyhow::Error),
    #[error("onLeave failed: {0}")]
    OnLeave(#[source] anyhow::Error),
    #[error("onDispose failed: {0}")]
    OnDispose(#[source] anyhow::Error),
    #[error("onMessage handler failed: {0}")]
    OnMessage(#[source] anyhow::Error),
    #[error("simulation interval failed: {0}")]
    SimulationInterval(#[source] anyhow::Error),
    #[error("timed event failed: {0}")]
    TimedEvent(#[source] anyhow::Error),
}

impl RoomException {
    /// Name of the offending hook, as passed to `on_uncaught_exception`.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::OnCreate(_) => "onCreate",
            Self::OnAuth(_) => "onAuth",
            Self::OnJoin(_) => "onJoin",
            Self::OnLeave(_) => "onLeave",
            Self::OnDispose(_) => "onDispose",
            Self::OnMessage(_) => "onMessage",
            Self::SimulationInterval(_) => "simulationInterval",
            Self::TimedEvent(_) => "timedEvent",
        }
    }

    /// True when the offending path was message handling, in which case the
    /// offending client is closed with `WS_CLOSE_WITH_ERROR`.
    pub fn from_message_path(&self) -> bool {
        matches!(self, Self::OnMessage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matchmake_errors_map_to_http_classes() {
        assert!(MatchmakeError::RoomNotFound("x".into()).is_client_error());
        assert!(MatchmakeError::SeatReservation("full".into()).is_client_error());
        assert!(MatchmakeError::Auth("denied".into()).is_client_error());
        assert!(!MatchmakeError::IpcTimeout(Duration::from_secs(1)).is_client_error());
        assert!(!MatchmakeError::ShuttingDown.is_client_error());
    }

    #[test]
    fn exception_method_names_match_hooks() {
        let err = RoomException::OnMessage(anyhow::anyhow!("boom"));
        assert_eq!(err.method_name(), "onMessage");
        assert!(err.from_message_path());

        let err = RoomException::SimulationInterval(anyhow::anyhow!("boom"));
        assert_eq!(err.method_name(), "simulationInterval");
        assert!(!err.from_message_path());
    }
}
