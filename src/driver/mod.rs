//! Room-cache store: the externally visible projection of every room,
//! queried by matchmaking across the fleet.
//!
//! Two implementations: [`LocalDriver`] keeps listings in process memory;
//! [`SharedDriver`] persists them as JSON fields of one presence hash so any
//! process sharing the presence sees the same listings.

mod local;
mod shared;

pub use local::LocalDriver;
pub use shared::SharedDriver;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::protocol::{ProcessId, RoomId};

/// Externally visible projection of a room used for discovery. Mutated only
/// by the owning process; removed on dispose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomListing {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub name: String,
    #[serde(rename = "processId")]
    pub process_id: ProcessId,
    #[serde(rename = "publicAddress", skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    pub clients: u32,
    #[serde(rename = "maxClients")]
    pub max_clients: u32,
    pub locked: bool,
    pub private: bool,
    pub unlisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Handler-declared `filter_by` fields captured from join options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoomListing {
    pub fn new(room_id: impl Into<RoomId>, name: impl Into<String>, process_id: impl Into<ProcessId>) -> Self {
        Self {
            room_id: room_id.into(),
            name: name.into(),
            process_id: process_id.into(),
            public_address: None,
            clients: 0,
            max_clients: u32::MAX,
            locked: false,
            private: false,
            unlisted: false,
            metadata: None,
            created_at: Utc::now(),
            extra: Map::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.clients < self.max_clients
    }

    /// Field-by-field equality against query conditions.
    pub fn matches(&self, conditions: &Conditions) -> bool {
        let value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(_) => return false,
        };
        let Some(object) = value.as_object() else {
            return false;
        };
        conditions.iter().all(|(key, expected)| {
            object.get(key).map_or(expected.is_null(), |actual| actual == expected)
        })
    }

    /// Apply a `{$set, $inc}` update in place.
    pub fn apply(&mut self, update: &CacheUpdate) -> anyhow::Result<()> {
        let mut value = serde_json::to_value(&*self)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("listing did not serialize to an object"))?;
        for (key, set) in &update.set {
            object.insert(key.clone(), set.clone());
        }
        for (key, delta) in &update.inc {
            let current = object.get(key).and_then(Value::as_i64).unwrap_or(0);
            // client counts never go negative, even when a decrement races a reap
            object.insert(key.clone(), Value::from((current + delta).max(0)));
        }
        *self = serde_json::from_value(value)?;
        Ok(())
    }
}

/// Equality conditions for `find_one`/`query`, keyed by listing field name.
pub type Conditions = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Field/direction pairs applied in order.
pub type SortOptions = Vec<(String, SortDirection)>;

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Stable sort of listings by the given options.
pub fn sort_listings(listings: &mut [RoomListing], sort: &SortOptions) {
    if sort.is_empty() {
        return;
    }
    listings.sort_by(|a, b| {
        let left = serde_json::to_value(a).unwrap_or(Value::Null);
        let right = serde_json::to_value(b).unwrap_or(Value::Null);
        for (field, direction) in sort {
            let ordering = compare_values(
                left.get(field).unwrap_or(&Value::Null),
                right.get(field).unwrap_or(&Value::Null),
            );
            let ordering = match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// A `{$set, $inc}` mutation against a cache entry.
#[derive(Debug, Clone, Default)]
pub struct CacheUpdate {
    pub set: Map<String, Value>,
    pub inc: std::collections::BTreeMap<String, i64>,
}

impl CacheUpdate {
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set.insert(key.to_string(), value.into());
        self
    }

    pub fn inc(mut self, key: &str, delta: i64) -> Self {
        self.inc.insert(key.to_string(), delta);
        self
    }
}

/// Handle held by the owning room to mutate its cache entry.
#[async_trait]
pub trait RoomCacheHandle: Send + Sync {
    /// Snapshot of the current entry.
    fn listing(&self) -> RoomListing;
    /// Persist the current entry as-is.
    async fn save(&self) -> anyhow::Result<()>;
    /// Apply and persist a `{$set, $inc}` update.
    async fn update_one(&self, update: CacheUpdate) -> anyhow::Result<()>;
    /// Delete the entry.
    async fn remove(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Register a new room listing and return the owner's handle to it.
    async fn create(&self, listing: RoomListing) -> anyhow::Result<Arc<dyn RoomCacheHandle>>;
    async fn has(&self, room_id: &str) -> anyhow::Result<bool>;
    async fn find_one(
        &self,
        conditions: &Conditions,
        sort: Option<&SortOptions>,
    ) -> anyhow::Result<Option<RoomListing>>;
    async fn query(
        &self,
        conditions: &Conditions,
        sort: Option<&SortOptions>,
    ) -> anyhow::Result<Vec<RoomListing>>;
    /// Remove every listing owned by a (dead) process. Returns removals.
    async fn cleanup(&self, process_id: &str) -> anyhow::Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_wire_form_uses_contracted_field_names() {
        let mut listing = RoomListing::new("r1", "chat", "proc-1");
        listing.public_address = Some("host:2567".into());
        let value = serde_json::to_value(&listing).unwrap();
        assert!(value.get("roomId").is_some());
        assert!(value.get("processId").is_some());
        assert!(value.get("publicAddress").is_some());
        assert!(value.get("maxClients").is_some());
        assert!(value.get("createdAt").is_some());
        // createdAt serializes as an ISO-8601 string
        assert!(value["createdAt"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn matches_compares_declared_fields_only() {
        let mut listing = RoomListing::new("r1", "chat", "proc-1");
        listing.extra.insert("mode".into(), json!("ranked"));

        let mut conditions = Conditions::new();
        conditions.insert("name".into(), json!("chat"));
        conditions.insert("locked".into(), json!(false));
        conditions.insert("mode".into(), json!("ranked"));
        assert!(listing.matches(&conditions));

        conditions.insert("mode".into(), json!("casual"));
        assert!(!listing.matches(&conditions));
    }

    #[test]
    fn apply_handles_set_and_inc() {
        let mut listing = RoomListing::new("r1", "chat", "proc-1");
        listing
            .apply(&CacheUpdate::default().set("locked", true).inc("clients", 2))
            .unwrap();
        assert!(listing.locked);
        assert_eq!(listing.clients, 2);

        listing
            .apply(&CacheUpdate::default().inc("clients", -5))
            .unwrap();
        assert_eq!(listing.clients, 0);
    }

    #[test]
    fn sort_orders_by_multiple_fields() {
        let mut a = RoomListing::new("a", "chat", "p");
        a.clients = 3;
        let mut b = RoomListing::new("b", "chat", "p");
        b.clients = 1;
        let mut c = RoomListing::new("c", "chat", "p");
        c.clients = 3;
        c.locked = true;

        let mut listings = vec![a, b, c];
        sort_listings(
            &mut listings,
            &vec![
                ("clients".to_string(), SortDirection::Descending),
                ("locked".to_string(), SortDirection::Ascending),
            ],
        );
        let ids: Vec<_> = listings.iter().map(|l| l.room_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }
}
