use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{Duration, Instant};

use super::{glob_match, Presence, Subscription};
use crate::errors::PresenceError;

type Result<T> = std::result::Result<T, PresenceError>;

#[derive(Debug, Clone)]
struct KeyEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct HashEntry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

/// Serialized form written to disk in dev mode and restored on boot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PresenceSnapshot {
    keys: HashMap<String, String>,
    sets: HashMap<String, Vec<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, Vec<String>>,
}

/// In-process presence: maps guarded by async locks, TTLs reaped lazily on
/// access (best-effort, like the backing stores this stands in for).
///
/// Several matchmakers sharing one `LocalPresence` behave exactly like a
/// fleet sharing one coordination store, which is how the cross-process
/// paths are exercised in tests.
pub struct LocalPresence {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
    keys: RwLock<HashMap<String, KeyEntry>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
    hashes: RwLock<HashMap<String, HashEntry>>,
    lists: RwLock<HashMap<String, VecDeque<String>>>,
    list_signal: Notify,
    snapshot_path: Option<PathBuf>,
}

impl Default for LocalPresence {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPresence {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
            hashes: RwLock::new(HashMap::new()),
            lists: RwLock::new(HashMap::new()),
            list_signal: Notify::new(),
            snapshot_path: None,
        }
    }

    /// Dev-mode constructor: restores state from `path` when the file exists
    /// and persists back to it on `shutdown()`.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut presence = Self {
            snapshot_path: Some(path.clone()),
            ..Self::new()
        };
        if let Ok(raw) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<PresenceSnapshot>(&raw) {
                Ok(snapshot) => presence.restore(snapshot),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "Ignoring unreadable presence snapshot");
                }
            }
        }
        presence
    }

    // Runs before the presence is shared, so the locks are free.
    fn restore(&mut self, snapshot: PresenceSnapshot) {
        let keys = self.keys.get_mut();
        for (key, value) in snapshot.keys {
            keys.insert(
                key,
                KeyEntry {
                    value,
                    expires_at: None,
                },
            );
        }
        let sets = self.sets.get_mut();
        for (key, members) in snapshot.sets {
            sets.insert(key, members.into_iter().collect());
        }
        let hashes = self.hashes.get_mut();
        for (key, fields) in snapshot.hashes {
            hashes.insert(
                key,
                HashEntry {
                    fields,
                    expires_at: None,
                },
            );
        }
        let lists = self.lists.get_mut();
        for (key, values) in snapshot.lists {
            lists.insert(key, values.into_iter().collect());
        }
    }

    /// Persist the current state to the configured snapshot path.
    pub async fn save_snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = PresenceSnapshot {
            keys: self
                .keys
                .read()
                .await
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
            sets: self
                .sets
                .read()
                .await
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
            hashes: self
                .hashes
                .read()
                .await
                .iter()
                .map(|(k, v)| (k.clone(), v.fields.clone()))
                .collect(),
            lists: self
                .lists
                .read()
                .await
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
        };
        let json =
            serde_json::to_string_pretty(&snapshot).map_err(|e| PresenceError::Io(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| PresenceError::Io(e.to_string()))?;
        tracing::debug!(path = %path.display(), "Presence snapshot saved");
        Ok(())
    }
}

fn parse_counter(key: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| PresenceError::NotAnInteger(key.to_string()))
}

#[async_trait]
impl Presence for LocalPresence {
    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(topic.to_string(), rx))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.subscribers.write().await.remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Value) -> Result<()> {
        let mut subscribers = self.subscribers.write().await;
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|sender| sender.send(data.clone()).is_ok());
            if senders.is_empty() {
                subscribers.remove(topic);
            }
        }
        Ok(())
    }

    async fn channels(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .subscribers
            .read()
            .await
            .iter()
            .filter(|(topic, senders)| !senders.is_empty() && glob_match(pattern, topic))
            .map(|(topic, _)| topic.clone())
            .collect())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.keys.write().await.insert(
            key.to_string(),
            KeyEntry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn setex(&self, key: &str, value: String, seconds: u64) -> Result<()> {
        self.keys.write().await.insert(
            key.to_string(),
            KeyEntry {
                value,
                expires_at: Some(Instant::now() + Duration::from_secs(seconds)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut keys = self.keys.write().await;
        let now = Instant::now();
        if let Some(entry) = keys.get(key) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                keys.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.keys.write().await.remove(key);
        self.sets.write().await.remove(key);
        self.hashes.write().await.remove(key);
        self.lists.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some()
            || self.sets.read().await.contains_key(key)
            || self.hashes.read().await.contains_key(key)
            || self.lists.read().await.contains_key(key))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(seconds);
        if let Some(entry) = self.keys.write().await.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        if let Some(entry) = self.hashes.write().await.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: String) -> Result<()> {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member);
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut sets = self.sets.write().await;
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .is_some_and(|set| set.contains(member)))
    }

    async fn scard(&self, key: &str) -> Result<usize> {
        Ok(self.sets.read().await.get(key).map_or(0, HashSet::len))
    }

    async fn sinter(&self, keys: &[String]) -> Result<Vec<String>> {
        let sets = self.sets.read().await;
        let Some((first, rest)) = keys.split_first() else {
            return Ok(Vec::new());
        };
        let Some(base) = sets.get(first) else {
            return Ok(Vec::new());
        };
        Ok(base
            .iter()
            .filter(|member| {
                rest.iter()
                    .all(|key| sets.get(key).is_some_and(|set| set.contains(*member)))
            })
            .cloned()
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<()> {
        self.hashes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .fields
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut hashes = self.hashes.write().await;
        let now = Instant::now();
        if let Some(entry) = hashes.get(key) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                hashes.remove(key);
                return Ok(None);
            }
            return Ok(entry.fields.get(field).cloned());
        }
        Ok(None)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut hashes = self.hashes.write().await;
        let now = Instant::now();
        if let Some(entry) = hashes.get(key) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                hashes.remove(key);
                return Ok(HashMap::new());
            }
            return Ok(entry.fields.clone());
        }
        Ok(HashMap::new())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut hashes = self.hashes.write().await;
        let Some(entry) = hashes.get_mut(key) else {
            return Ok(false);
        };
        let removed = entry.fields.remove(field).is_some();
        if entry.fields.is_empty() {
            hashes.remove(key);
        }
        Ok(removed)
    }

    async fn hdel_many(&self, key: &str, fields: &[String]) -> Result<usize> {
        let mut hashes = self.hashes.write().await;
        let Some(entry) = hashes.get_mut(key) else {
            return Ok(0);
        };
        let mut removed = 0;
        for field in fields {
            if entry.fields.remove(field).is_some() {
                removed += 1;
            }
        }
        if entry.fields.is_empty() {
            hashes.remove(key);
        }
        Ok(removed)
    }

    async fn hincrby(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut hashes = self.hashes.write().await;
        let entry = hashes.entry(key.to_string()).or_default();
        let current = match entry.fields.get(field) {
            Some(raw) => parse_counter(key, raw)?,
            None => 0,
        };
        let next = current + by;
        entry.fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hincrbyex(&self, key: &str, field: &str, by: i64, ttl_seconds: u64) -> Result<i64> {
        let mut hashes = self.hashes.write().await;
        let now = Instant::now();
        if hashes
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some_and(|at| at <= now))
        {
            hashes.remove(key);
        }
        let entry = hashes.entry(key.to_string()).or_default();
        let current = match entry.fields.get(field) {
            Some(raw) => parse_counter(key, raw)?,
            None => 0,
        };
        let next = current + by;
        entry.fields.insert(field.to_string(), next.to_string());
        entry.expires_at = Some(now + Duration::from_secs(ttl_seconds));
        Ok(next)
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .map_or(0, |entry| entry.fields.len()))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut keys = self.keys.write().await;
        let current = match keys.get(key) {
            Some(entry) => parse_counter(key, &entry.value)?,
            None => 0,
        };
        let next = current + 1;
        keys.insert(
            key.to_string(),
            KeyEntry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut keys = self.keys.write().await;
        let current = match keys.get(key) {
            Some(entry) => parse_counter(key, &entry.value)?,
            None => 0,
        };
        let next = current - 1;
        keys.insert(
            key.to_string(),
            KeyEntry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn lpush(&self, key: &str, value: String) -> Result<()> {
        self.lists
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push_front(value);
        self.list_signal.notify_waiters();
        Ok(())
    }

    async fn rpush(&self, key: &str, value: String) -> Result<()> {
        self.lists
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(value);
        self.list_signal.notify_waiters();
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lists
            .write()
            .await
            .get_mut(key)
            .and_then(VecDeque::pop_front))
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lists
            .write()
            .await
            .get_mut(key)
            .and_then(VecDeque::pop_back))
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        Ok(self.lists.read().await.get(key).map_or(0, VecDeque::len))
    }

    async fn brpop(
        &self,
        keys: &[String],
        timeout_seconds: f64,
    ) -> Result<Option<(String, String)>> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout_seconds.max(0.0));
        loop {
            // Register for the wakeup before checking, so a push between the
            // check and the await cannot be missed.
            let mut notified = std::pin::pin!(self.list_signal.notified());
            notified.as_mut().enable();
            {
                let mut lists = self.lists.write().await;
                for key in keys {
                    if let Some(value) = lists.get_mut(key).and_then(VecDeque::pop_back) {
                        return Ok(Some((key.clone(), value)));
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn shutdown(&self) {
        if let Err(error) = self.save_snapshot().await {
            tracing::warn!(%error, "Failed to save presence snapshot on shutdown");
        }
        self.subscribers.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_every_subscriber_in_order() {
        let presence = LocalPresence::new();
        let mut first = presence.subscribe("topic").await.unwrap();
        let mut second = presence.subscribe("topic").await.unwrap();

        presence.publish("topic", json!(1)).await.unwrap();
        presence.publish("topic", json!(2)).await.unwrap();

        assert_eq!(first.recv().await, Some(json!(1)));
        assert_eq!(first.recv().await, Some(json!(2)));
        assert_eq!(second.recv().await, Some(json!(1)));
        assert_eq!(second.recv().await, Some(json!(2)));
    }

    #[tokio::test]
    async fn unsubscribe_ends_delivery() {
        let presence = LocalPresence::new();
        let mut sub = presence.subscribe("topic").await.unwrap();
        presence.unsubscribe("topic").await.unwrap();
        presence.publish("topic", json!("late")).await.unwrap();
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn channels_filters_by_pattern() {
        let presence = LocalPresence::new();
        let _a = presence.subscribe("$room1").await.unwrap();
        let _b = presence.subscribe("$room2").await.unwrap();
        let _c = presence.subscribe("p:proc").await.unwrap();

        let mut rooms = presence.channels("$*").await.unwrap();
        rooms.sort();
        assert_eq!(rooms, vec!["$room1", "$room2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn setex_expires_lazily() {
        let presence = LocalPresence::new();
        presence.setex("k", "v".into(), 2).await.unwrap();
        assert_eq!(presence.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(presence.get("k").await.unwrap(), None);
        assert!(!presence.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn hincrbyex_counts_and_expires() {
        let presence = LocalPresence::new();
        assert_eq!(presence.hincrbyex("ch:chat", "key", 1, 10).await.unwrap(), 1);
        assert_eq!(presence.hincrbyex("ch:chat", "key", 1, 10).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        // expired hash starts over
        assert_eq!(presence.hincrbyex("ch:chat", "key", 1, 10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn counters_increment_and_reject_garbage() {
        let presence = LocalPresence::new();
        assert_eq!(presence.incr("ccu").await.unwrap(), 1);
        assert_eq!(presence.incr("ccu").await.unwrap(), 2);
        assert_eq!(presence.decr("ccu").await.unwrap(), 1);

        presence.set("junk", "not-a-number".into()).await.unwrap();
        assert!(presence.incr("junk").await.is_err());
    }

    #[tokio::test]
    async fn hash_field_operations() {
        let presence = LocalPresence::new();
        presence.hset("h", "a", "1".into()).await.unwrap();
        presence.hset("h", "b", "2".into()).await.unwrap();
        assert_eq!(presence.hlen("h").await.unwrap(), 2);
        assert_eq!(presence.hget("h", "a").await.unwrap().as_deref(), Some("1"));

        let all = presence.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);

        assert!(presence.hdel("h", "a").await.unwrap());
        assert!(!presence.hdel("h", "a").await.unwrap());
        assert_eq!(
            presence
                .hdel_many("h", &["b".to_string(), "missing".to_string()])
                .await
                .unwrap(),
            1
        );
        assert_eq!(presence.hlen("h").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_operations_and_sinter() {
        let presence = LocalPresence::new();
        presence.sadd("a", "x".into()).await.unwrap();
        presence.sadd("a", "y".into()).await.unwrap();
        presence.sadd("b", "y".into()).await.unwrap();
        presence.sadd("b", "z".into()).await.unwrap();

        assert_eq!(presence.scard("a").await.unwrap(), 2);
        assert!(presence.sismember("a", "x").await.unwrap());
        assert_eq!(
            presence
                .sinter(&["a".to_string(), "b".to_string()])
                .await
                .unwrap(),
            vec!["y".to_string()]
        );
        presence.srem("a", "x").await.unwrap();
        assert!(!presence.sismember("a", "x").await.unwrap());
    }

    #[tokio::test]
    async fn brpop_returns_immediately_when_available() {
        let presence = LocalPresence::new();
        presence.lpush("l", "first".into()).await.unwrap();
        presence.lpush("l", "second".into()).await.unwrap();
        // right pop takes the oldest lpush
        let popped = presence.brpop(&["l".to_string()], 1.0).await.unwrap();
        assert_eq!(popped, Some(("l".to_string(), "first".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn brpop_wakes_on_concurrent_push() {
        let presence = std::sync::Arc::new(LocalPresence::new());
        let pusher = presence.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pusher.lpush("queue", "ready".into()).await.unwrap();
        });

        let popped = presence
            .brpop(&["queue".to_string()], 5.0)
            .await
            .unwrap();
        assert_eq!(popped, Some(("queue".to_string(), "ready".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn brpop_times_out_empty_handed() {
        let presence = LocalPresence::new();
        let popped = presence.brpop(&["nothing".to_string()], 0.2).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.json");

        let presence = LocalPresence::with_snapshot(&path);
        presence.set("key", "value".into()).await.unwrap();
        presence.sadd("set", "member".into()).await.unwrap();
        presence.hset("hash", "field", "1".into()).await.unwrap();
        presence.rpush("list", "item".into()).await.unwrap();
        presence.shutdown().await;

        let restored = LocalPresence::with_snapshot(&path);
        assert_eq!(restored.get("key").await.unwrap().as_deref(), Some("value"));
        assert!(restored.sismember("set", "member").await.unwrap());
        assert_eq!(
            restored.hget("hash", "field").await.unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(restored.llen("list").await.unwrap(), 1);
    }
}
