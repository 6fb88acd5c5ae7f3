use serde::{Deserialize, Serialize};
use std::fmt;

/// Fleet-unique room identifier (9-char alphanumeric, generated at creation).
pub type RoomId = String;

/// Per-client session identifier, unique within its room's lifetime.
pub type SessionId = String;

/// Stable identifier of a server process, valid for the process lifetime.
pub type ProcessId = String;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 9;

/// Generate a short alphanumeric identifier used for room and session ids.
pub fn generate_id() -> String {
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[fastrand::usize(..ID_ALPHABET.len())] as char)
        .collect()
}

/// The type tag of a room message. Clients may address handlers either by
/// string name or by a compact numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageType {
    Id(u64),
    Text(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Text(name) => f.write_str(name),
        }
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for MessageType {
    fn from(value: u64) -> Self {
        Self::Id(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_well_formed() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 9);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn message_type_serializes_untagged() {
        let text = serde_json::to_value(MessageType::from("move")).unwrap();
        assert_eq!(text, serde_json::json!("move"));
        let num = serde_json::to_value(MessageType::from(7u64)).unwrap();
        assert_eq!(num, serde_json::json!(7));
    }
}
