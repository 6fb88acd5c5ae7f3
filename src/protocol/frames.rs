use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;

use super::{MessageType, Protocol};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown protocol code {0}")]
    UnknownCode(u8),
    #[error("unexpected {0:?} frame from client")]
    UnexpectedCode(Protocol),
    #[error("malformed frame body: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Body of a `JOIN_ROOM` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomEnvelope {
    pub reconnection_token: String,
    pub serializer_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub handshake: Option<ByteBuf>,
}

/// Body of an `ERROR` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub message: String,
}

/// Body of a `ROOM_DATA` frame: a message type plus an optional packed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub ty: MessageType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BytesEnvelope {
    ty: MessageType,
    data: ByteBuf,
}

fn frame(code: Protocol, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(code as u8);
    buf.put_slice(body);
    buf.freeze()
}

fn encode_body<T: Serialize>(code: Protocol, body: &T) -> Bytes {
    // rmp encoding of plain structs over owned data cannot fail
    let encoded = rmp_serde::to_vec(body).unwrap_or_default();
    frame(code, &encoded)
}

pub fn encode_join_room(envelope: &JoinRoomEnvelope) -> Bytes {
    encode_body(Protocol::JoinRoom, envelope)
}

pub fn encode_error(code: u16, message: &str) -> Bytes {
    encode_body(
        Protocol::Error,
        &ErrorEnvelope {
            code,
            message: message.to_string(),
        },
    )
}

pub fn encode_leave_room() -> Bytes {
    frame(Protocol::LeaveRoom, &[])
}

pub fn encode_room_data(ty: MessageType, payload: Option<serde_json::Value>) -> Bytes {
    encode_body(Protocol::RoomData, &MessageEnvelope { ty, payload })
}

pub fn encode_room_data_bytes(ty: MessageType, data: &[u8]) -> Bytes {
    encode_body(
        Protocol::RoomDataBytes,
        &BytesEnvelope {
            ty,
            data: ByteBuf::from(data.to_vec()),
        },
    )
}

pub fn encode_room_state(state: &[u8]) -> Bytes {
    frame(Protocol::RoomState, state)
}

pub fn encode_room_state_patch(patch: &[u8]) -> Bytes {
    frame(Protocol::RoomStatePatch, patch)
}

pub fn encode_reconnect(token: &str) -> Bytes {
    // rmp encoding of a &str cannot fail
    let encoded = rmp_serde::to_vec(token).unwrap_or_default();
    frame(Protocol::Reconnect, &encoded)
}

/// A decoded client→server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    RoomData {
        ty: MessageType,
        payload: Option<serde_json::Value>,
    },
    RoomDataBytes {
        ty: MessageType,
        data: Vec<u8>,
    },
    Reconnect {
        token: String,
    },
    LeaveRoom,
}

impl ClientFrame {
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        let (&code, body) = raw.split_first().ok_or(ProtocolError::Empty)?;
        let code = Protocol::from_byte(code).ok_or(ProtocolError::UnknownCode(code))?;
        match code {
            Protocol::RoomData => {
                let envelope: MessageEnvelope = rmp_serde::from_slice(body)?;
                Ok(Self::RoomData {
                    ty: envelope.ty,
                    payload: envelope.payload,
                })
            }
            Protocol::RoomDataBytes => {
                let envelope: BytesEnvelope = rmp_serde::from_slice(body)?;
                Ok(Self::RoomDataBytes {
                    ty: envelope.ty,
                    data: envelope.data.into_vec(),
                })
            }
            Protocol::Reconnect => {
                let token: String = rmp_serde::from_slice(body)?;
                Ok(Self::Reconnect { token })
            }
            Protocol::LeaveRoom => Ok(Self::LeaveRoom),
            other => Err(ProtocolError::UnexpectedCode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn room_data_round_trip() {
        let raw = encode_room_data(
            MessageType::from("move"),
            Some(json!({"x": 4, "y": -2, "sprint": true})),
        );
        assert_eq!(raw[0], Protocol::RoomData as u8);

        match ClientFrame::decode(&raw).unwrap() {
            ClientFrame::RoomData { ty, payload } => {
                assert_eq!(ty, MessageType::from("move"));
                assert_eq!(payload, Some(json!({"x": 4, "y": -2, "sprint": true})));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn numeric_message_types_survive_encoding() {
        let raw = encode_room_data(MessageType::from(42u64), None);
        match ClientFrame::decode(&raw).unwrap() {
            ClientFrame::RoomData { ty, payload } => {
                assert_eq!(ty, MessageType::Id(42));
                assert_eq!(payload, None);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn bytes_payloads_pass_through_untouched() {
        let raw = encode_room_data_bytes(MessageType::from("blob"), &[0, 159, 146, 150]);
        match ClientFrame::decode(&raw).unwrap() {
            ClientFrame::RoomDataBytes { ty, data } => {
                assert_eq!(ty, MessageType::from("blob"));
                assert_eq!(data, vec![0, 159, 146, 150]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn reconnect_carries_token() {
        let raw = encode_reconnect("token-123");
        match ClientFrame::decode(&raw).unwrap() {
            ClientFrame::Reconnect { token } => assert_eq!(token, "token-123"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn server_only_codes_are_rejected_from_clients() {
        let raw = encode_room_state(&[1, 2, 3]);
        assert!(matches!(
            ClientFrame::decode(&raw),
            Err(ProtocolError::UnexpectedCode(Protocol::RoomState))
        ));
        assert!(matches!(
            ClientFrame::decode(&[]),
            Err(ProtocolError::Empty)
        ));
        assert!(matches!(
            ClientFrame::decode(&[99]),
            Err(ProtocolError::UnknownCode(99))
        ));
    }

    #[test]
    fn join_room_envelope_round_trips() {
        let envelope = JoinRoomEnvelope {
            reconnection_token: "r-1".into(),
            serializer_id: "json".into(),
            handshake: Some(ByteBuf::from(vec![7, 7])),
        };
        let raw = encode_join_room(&envelope);
        assert_eq!(raw[0], Protocol::JoinRoom as u8);
        let decoded: JoinRoomEnvelope = rmp_serde::from_slice(&raw[1..]).unwrap();
        assert_eq!(decoded, envelope);
    }
}
