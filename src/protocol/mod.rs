//! Client↔room wire protocol.
//!
//! Every frame between a client and its room starts with a single protocol
//! code byte; the remainder is a MessagePack-encoded envelope (or raw
//! serializer bytes for state frames). The numeric values are contracted;
//! SDKs depend on them and they must never be renumbered.

mod frames;
mod types;

pub use frames::{
    encode_error, encode_join_room, encode_leave_room, encode_reconnect, encode_room_data,
    encode_room_data_bytes, encode_room_state, encode_room_state_patch, ClientFrame,
    ErrorEnvelope, JoinRoomEnvelope, MessageEnvelope, ProtocolError,
};
pub use types::{generate_id, MessageType, ProcessId, RoomId, SessionId};

use serde::{Deserialize, Serialize};

/// Protocol code carried in byte 0 of every client↔room frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Protocol {
    /// S→C: seat consumed, carries reconnection token and serializer handshake
    JoinRoom = 10,
    /// S→C: structured error with code and message
    Error = 11,
    /// S→C: the room is releasing this client
    LeaveRoom = 12,
    /// Both directions: typed message with optional packed payload
    RoomData = 13,
    /// S→C: full serialized room state
    RoomState = 14,
    /// S→C: delta produced by the serializer at patch rate
    RoomStatePatch = 15,
    /// Both directions: typed message with a raw byte payload
    RoomDataBytes = 17,
    /// C→S: resume a held session, carries the reconnection token
    Reconnect = 19,
}

impl Protocol {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            10 => Some(Self::JoinRoom),
            11 => Some(Self::Error),
            12 => Some(Self::LeaveRoom),
            13 => Some(Self::RoomData),
            14 => Some(Self::RoomState),
            15 => Some(Self::RoomStatePatch),
            17 => Some(Self::RoomDataBytes),
            19 => Some(Self::Reconnect),
            _ => None,
        }
    }
}

/// WebSocket close code for a voluntary, client-initiated leave.
pub const WS_CLOSE_CONSENTED: u16 = 4000;
/// WebSocket close code used when the server tears a client down after an error.
pub const WS_CLOSE_WITH_ERROR: u16 = 4002;
/// WebSocket close code sent before a dev-mode restart; clients should retry.
pub const WS_CLOSE_DEVMODE_RESTART: u16 = 4010;

/// Matchmaking / runtime error codes surfaced to clients as `{code, message}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    MatchmakeNoHandler = 4210,
    MatchmakeInvalidCriteria = 4211,
    MatchmakeInvalidRoomId = 4212,
    MatchmakeUnhandled = 4213,
    MatchmakeExpired = 4214,
    AuthFailed = 4215,
    ApplicationError = 4216,
    InvalidPayload = 4217,
}

impl ErrorCode {
    pub fn value(self) -> u16 {
        self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes_are_contracted() {
        assert_eq!(Protocol::JoinRoom as u8, 10);
        assert_eq!(Protocol::Error as u8, 11);
        assert_eq!(Protocol::LeaveRoom as u8, 12);
        assert_eq!(Protocol::RoomData as u8, 13);
        assert_eq!(Protocol::RoomState as u8, 14);
        assert_eq!(Protocol::RoomStatePatch as u8, 15);
        assert_eq!(Protocol::RoomDataBytes as u8, 17);
        assert_eq!(Protocol::Reconnect as u8, 19);
    }

    #[test]
    fn from_byte_round_trips() {
        for code in [
            Protocol::JoinRoom,
            Protocol::Error,
            Protocol::LeaveRoom,
            Protocol::RoomData,
            Protocol::RoomState,
            Protocol::RoomStatePatch,
            Protocol::RoomDataBytes,
            Protocol::Reconnect,
        ] {
            assert_eq!(Protocol::from_byte(code as u8), Some(code));
        }
        assert_eq!(Protocol::from_byte(0), None);
        assert_eq!(Protocol::from_byte(16), None);
    }

    #[test]
    fn close_codes_are_contracted() {
        assert_eq!(WS_CLOSE_CONSENTED, 4000);
        assert_eq!(WS_CLOSE_WITH_ERROR, 4002);
        assert_eq!(WS_CLOSE_DEVMODE_RESTART, 4010);
    }
}
