//! Distributed coordination primitive.
//!
//! `Presence` bundles the capabilities the rest of the server coordinates
//! through: topic pub/sub, keys with TTL, sets, hashes, counters and lists
//! with a blocking pop. Everything cross-process (IPC, room listings, stats,
//! the create-path rendezvous) is written against this trait, so a process
//! fleet is formed by pointing every process at the same backing store.
//!
//! [`LocalPresence`] is the in-process implementation. A store-backed
//! implementation (one keyspace engine with pub/sub) slots in behind the same
//! trait without touching any caller.

mod local;

pub use local::LocalPresence;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::errors::PresenceError;

type Result<T> = std::result::Result<T, PresenceError>;

/// A live subscription to a topic. Dropping the receiver ends delivery;
/// `Presence::unsubscribe` ends delivery for every subscriber of the topic.
pub struct Subscription {
    pub topic: String,
    receiver: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn new(topic: String, receiver: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { topic, receiver }
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait Presence: Send + Sync {
    // pub/sub
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
    async fn publish(&self, topic: &str, data: Value) -> Result<()>;
    /// Topics with at least one live subscriber matching a `*` glob pattern.
    async fn channels(&self, pattern: &str) -> Result<Vec<String>>;

    // keys
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn setex(&self, key: &str, value: String, seconds: u64) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, seconds: u64) -> Result<()>;

    // sets
    async fn sadd(&self, key: &str, member: String) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    async fn scard(&self, key: &str) -> Result<usize>;
    async fn sinter(&self, keys: &[String]) -> Result<Vec<String>>;

    // hashes
    async fn hset(&self, key: &str, field: &str, value: String) -> Result<()>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;
    /// Batched field removal; returns how many fields existed.
    async fn hdel_many(&self, key: &str, fields: &[String]) -> Result<usize>;
    async fn hincrby(&self, key: &str, field: &str, by: i64) -> Result<i64>;
    /// Increment and (re)arm a TTL on the whole hash key in one step. The
    /// create-path concurrency counter relies on this being atomic.
    async fn hincrbyex(&self, key: &str, field: &str, by: i64, ttl_seconds: u64) -> Result<i64>;
    async fn hlen(&self, key: &str) -> Result<usize>;

    // counters
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn decr(&self, key: &str) -> Result<i64>;

    // lists
    async fn lpush(&self, key: &str, value: String) -> Result<()>;
    async fn rpush(&self, key: &str, value: String) -> Result<()>;
    async fn lpop(&self, key: &str) -> Result<Option<String>>;
    async fn rpop(&self, key: &str) -> Result<Option<String>>;
    async fn llen(&self, key: &str) -> Result<usize>;
    /// Blocking right-pop across keys; resolves `Some((key, value))` as soon
    /// as any key has an element, or `None` after `timeout_seconds`.
    async fn brpop(&self, keys: &[String], timeout_seconds: f64) -> Result<Option<(String, String)>>;

    async fn shutdown(&self);
}

/// Minimal `*` glob used by `channels(pattern)`.
pub(crate) fn glob_match(pattern: &str, topic: &str) -> bool {
    fn inner(pattern: &[u8], topic: &[u8]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], topic)
                    || (!topic.is_empty() && inner(pattern, &topic[1..]))
            }
            (Some(p), Some(t)) if p == t => inner(&pattern[1..], &topic[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), topic.as_bytes())
}
