//! Request/reply pattern over [`Presence`](crate::presence::Presence) pub/sub.
//!
//! A caller subscribes to a single-use reply topic `ipc:<requestId>`, then
//! publishes `[method, requestId, args]` on the target inbox (`p:<processId>`
//! for matchmaking methods, `$<roomId>` for room method invocations). The
//! responder publishes `[code, payloadOrMessage]` back on the reply topic.
//! Replies that arrive after the caller timed out land on an unsubscribed
//! topic and are dropped.

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::PresenceError;
use crate::presence::Presence;

/// Bound for cheap liveness probes.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(1);
/// Bound for create/reserve calls that may do real work.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

const CODE_SUCCESS: u64 = 0;
const CODE_ERROR: u64 = 1;

/// Per-process inbox topic.
pub fn process_topic(process_id: &str) -> String {
    format!("p:{process_id}")
}

/// Per-room inbox topic.
pub fn room_topic(room_id: &str) -> String {
    format!("${room_id}")
}

fn reply_topic(request_id: &str) -> String {
    format!("ipc:{request_id}")
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("malformed ipc frame")]
    Malformed,
    #[error(transparent)]
    Presence(#[from] PresenceError),
}

/// Issue a request on `channel` and await the correlated reply.
pub async fn request(
    presence: &dyn Presence,
    channel: &str,
    method: &str,
    args: Value,
    timeout: Duration,
) -> Result<Value, IpcError> {
    let request_id = Uuid::new_v4().to_string();
    let reply_channel = reply_topic(&request_id);

    // Subscribe before publishing so a fast responder cannot win the race.
    let mut subscription = presence.subscribe(&reply_channel).await?;
    presence
        .publish(channel, json!([method, request_id, args]))
        .await?;

    let outcome = tokio::time::timeout(timeout, subscription.recv()).await;
    presence.unsubscribe(&reply_channel).await?;

    match outcome {
        Err(_) => Err(IpcError::Timeout(timeout)),
        Ok(None) => Err(IpcError::Presence(PresenceError::Shutdown)),
        Ok(Some(frame)) => decode_reply(frame),
    }
}

fn decode_reply(frame: Value) -> Result<Value, IpcError> {
    let Value::Array(mut parts) = frame else {
        return Err(IpcError::Malformed);
    };
    if parts.len() != 2 {
        return Err(IpcError::Malformed);
    }
    let payload = parts.pop().unwrap_or(Value::Null);
    let code = parts
        .pop()
        .and_then(|code| code.as_u64())
        .ok_or(IpcError::Malformed)?;
    match code {
        CODE_SUCCESS => Ok(payload),
        CODE_ERROR => Err(IpcError::Remote(
            payload.as_str().unwrap_or("unknown remote failure").to_string(),
        )),
        _ => Err(IpcError::Malformed),
    }
}

/// An inbound request decoded from an inbox topic.
#[derive(Debug, Clone)]
pub struct IpcRequest {
    pub method: String,
    pub request_id: String,
    pub args: Value,
}

impl IpcRequest {
    pub fn parse(frame: Value) -> Option<Self> {
        let Value::Array(mut parts) = frame else {
            return None;
        };
        if parts.len() != 3 {
            return None;
        }
        let args = parts.pop()?;
        let request_id = parts.pop()?.as_str()?.to_string();
        let method = parts.pop()?.as_str()?.to_string();
        Some(Self {
            method,
            request_id,
            args,
        })
    }
}

/// Publish the reply for a handled request. Handler errors travel as message
/// strings, never as structured values.
pub async fn reply(
    presence: &dyn Presence,
    request_id: &str,
    result: Result<Value, String>,
) -> Result<(), PresenceError> {
    let frame = match result {
        Ok(payload) => json!([CODE_SUCCESS, payload]),
        Err(message) => json!([CODE_ERROR, message]),
    };
    presence.publish(&reply_topic(request_id), frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::LocalPresence;
    use std::sync::Arc;

    async fn spawn_responder(presence: Arc<LocalPresence>, channel: &str) {
        let mut inbox = presence.subscribe(channel).await.unwrap();
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                let request = IpcRequest::parse(frame).unwrap();
                let result = match request.method.as_str() {
                    "double" => Ok(json!(request.args.as_i64().unwrap() * 2)),
                    other => Err(format!("unknown method `{other}`")),
                };
                reply(presence.as_ref(), &request.request_id, result)
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let presence = Arc::new(LocalPresence::new());
        spawn_responder(presence.clone(), "p:responder").await;

        let reply = request(
            presence.as_ref(),
            "p:responder",
            "double",
            json!(21),
            LONG_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(reply, json!(42));
    }

    #[tokio::test]
    async fn remote_errors_carry_message_strings() {
        let presence = Arc::new(LocalPresence::new());
        spawn_responder(presence.clone(), "p:responder").await;

        let error = request(
            presence.as_ref(),
            "p:responder",
            "missing",
            Value::Null,
            LONG_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, IpcError::Remote(message) if message.contains("missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let presence = LocalPresence::new();
        let error = request(
            &presence,
            "p:nobody",
            "ping",
            Value::Null,
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, IpcError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn late_replies_are_dropped_silently() {
        let presence = Arc::new(LocalPresence::new());
        let mut inbox = presence.subscribe("p:slow").await.unwrap();

        let slow = presence.clone();
        tokio::spawn(async move {
            let frame = inbox.recv().await.unwrap();
            let request = IpcRequest::parse(frame).unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            // the caller has long since unsubscribed; this must be a no-op
            reply(slow.as_ref(), &request.request_id, Ok(json!("late")))
                .await
                .unwrap();
        });

        let error = request(
            presence.as_ref(),
            "p:slow",
            "ping",
            Value::Null,
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, IpcError::Timeout(_)));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(presence.channels("ipc:*").await.unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_malformed_frames() {
        assert!(IpcRequest::parse(json!("nope")).is_none());
        assert!(IpcRequest::parse(json!(["only-method"])).is_none());
        assert!(IpcRequest::parse(json!([1, "rid", {}])).is_none());
        let ok = IpcRequest::parse(json!(["m", "rid", [1, 2]])).unwrap();
        assert_eq!(ok.method, "m");
        assert_eq!(ok.request_id, "rid");
        assert_eq!(ok.args, json!([1, 2]));
    }
}
