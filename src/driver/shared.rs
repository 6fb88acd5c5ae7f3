use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{sort_listings, CacheUpdate, Conditions, Driver, RoomCacheHandle, RoomListing, SortOptions};
use crate::presence::Presence;

/// Hash holding `roomId → JSON(listing)` for the whole fleet.
const ROOMCACHES_KEY: &str = "roomcaches";
/// Field-removal batch size for dead-process cleanup.
const CLEANUP_BATCH: usize = 500;

type FetchFuture = Shared<BoxFuture<'static, Arc<HashMap<String, String>>>>;

#[derive(Default)]
struct QueryState {
    generation: u64,
    fetch: Option<FetchFuture>,
    /// Parsed listings per room name, valid only while the generating fetch
    /// is still being shared by concurrent queries.
    by_name: HashMap<String, Arc<Vec<RoomListing>>>,
}

/// Driver backed by a presence hash shared across processes.
pub struct SharedDriver {
    presence: Arc<dyn Presence>,
    state: Mutex<QueryState>,
}

impl SharedDriver {
    pub fn new(presence: Arc<dyn Presence>) -> Self {
        Self {
            presence,
            state: Mutex::new(QueryState::default()),
        }
    }

    /// Fetch the whole hash, coalescing concurrent callers onto a single
    /// in-flight request.
    async fn fetch_all(&self) -> (Arc<HashMap<String, String>>, u64) {
        let (future, generation, created) = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(fetch) = &state.fetch {
                (fetch.clone(), state.generation, false)
            } else {
                state.generation += 1;
                let presence = self.presence.clone();
                let fetch: FetchFuture = async move {
                    match presence.hgetall(ROOMCACHES_KEY).await {
                        Ok(fields) => Arc::new(fields),
                        Err(error) => {
                            tracing::warn!(%error, "Room cache fetch failed; treating as empty");
                            Arc::new(HashMap::new())
                        }
                    }
                }
                .boxed()
                .shared();
                state.fetch = Some(fetch.clone());
                (fetch, state.generation, true)
            }
        };

        let fields = future.await;

        if created {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if state.generation == generation {
                state.fetch = None;
                state.by_name.clear();
            }
        }

        (fields, generation)
    }

    async fn listings_for_name(&self, name: &str) -> Arc<Vec<RoomListing>> {
        {
            let state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if state.fetch.is_some() {
                if let Some(hit) = state.by_name.get(name) {
                    return hit.clone();
                }
            }
        }

        let (fields, generation) = self.fetch_all().await;
        // Substring pre-filter skips JSON parsing for entries that cannot
        // belong to this room name; the parse below confirms real matches.
        let needle = format!("\"name\":\"{name}\"");
        let listings: Arc<Vec<RoomListing>> = Arc::new(
            fields
                .values()
                .filter(|raw| raw.contains(&needle))
                .filter_map(|raw| serde_json::from_str::<RoomListing>(raw).ok())
                .filter(|listing| listing.name == name)
                .collect(),
        );

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.generation == generation && state.fetch.is_some() {
            state.by_name.insert(name.to_string(), listings.clone());
        }
        listings
    }
}

struct SharedCacheHandle {
    presence: Arc<dyn Presence>,
    listing: RwLock<RoomListing>,
}

impl SharedCacheHandle {
    async fn persist(&self) -> anyhow::Result<()> {
        let (room_id, json) = {
            let listing = self
                .listing
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (listing.room_id.clone(), serde_json::to_string(&*listing)?)
        };
        self.presence.hset(ROOMCACHES_KEY, &room_id, json).await?;
        Ok(())
    }
}

#[async_trait]
impl RoomCacheHandle for SharedCacheHandle {
    fn listing(&self) -> RoomListing {
        self.listing
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn save(&self) -> anyhow::Result<()> {
        self.persist().await
    }

    async fn update_one(&self, update: CacheUpdate) -> anyhow::Result<()> {
        self.listing
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .apply(&update)?;
        self.persist().await
    }

    async fn remove(&self) -> anyhow::Result<()> {
        let room_id = self
            .listing
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .room_id
            .clone();
        self.presence.hdel(ROOMCACHES_KEY, &room_id).await?;
        Ok(())
    }
}

#[async_trait]
impl Driver for SharedDriver {
    async fn create(&self, listing: RoomListing) -> anyhow::Result<Arc<dyn RoomCacheHandle>> {
        let handle = Arc::new(SharedCacheHandle {
            presence: self.presence.clone(),
            listing: RwLock::new(listing),
        });
        handle.persist().await?;
        Ok(handle)
    }

    async fn has(&self, room_id: &str) -> anyhow::Result<bool> {
        Ok(self.presence.hget(ROOMCACHES_KEY, room_id).await?.is_some())
    }

    async fn find_one(
        &self,
        conditions: &Conditions,
        sort: Option<&SortOptions>,
    ) -> anyhow::Result<Option<RoomListing>> {
        Ok(self.query(conditions, sort).await?.into_iter().next())
    }

    async fn query(
        &self,
        conditions: &Conditions,
        sort: Option<&SortOptions>,
    ) -> anyhow::Result<Vec<RoomListing>> {
        let candidates: Vec<RoomListing> =
            match conditions.get("name").and_then(serde_json::Value::as_str) {
                Some(name) => self.listings_for_name(name).await.as_ref().clone(),
                None => {
                    let (fields, _) = self.fetch_all().await;
                    fields
                        .values()
                        .filter_map(|raw| serde_json::from_str::<RoomListing>(raw).ok())
                        .collect()
                }
            };

        let mut listings: Vec<_> = candidates
            .into_iter()
            .filter(|listing| listing.matches(conditions))
            .collect();
        if let Some(sort) = sort {
            sort_listings(&mut listings, sort);
        }
        Ok(listings)
    }

    async fn cleanup(&self, process_id: &str) -> anyhow::Result<usize> {
        let fields = self.presence.hgetall(ROOMCACHES_KEY).await?;
        let needle = format!("\"processId\":\"{process_id}\"");
        let doomed: Vec<String> = fields
            .iter()
            .filter(|(_, raw)| raw.contains(&needle))
            .filter(|(_, raw)| {
                serde_json::from_str::<RoomListing>(raw)
                    .map(|listing| listing.process_id == process_id)
                    .unwrap_or(false)
            })
            .map(|(room_id, _)| room_id.clone())
            .collect();

        let mut removed = 0;
        for batch in doomed.chunks(CLEANUP_BATCH) {
            removed += self.presence.hdel_many(ROOMCACHES_KEY, batch).await?;
        }
        if removed > 0 {
            tracing::info!(%process_id, count = removed, "Cleaned up room caches for process");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::LocalPresence;
    use serde_json::json;

    fn conditions(pairs: &[(&str, serde_json::Value)]) -> Conditions {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn listings_are_visible_across_driver_instances() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let writer = SharedDriver::new(presence.clone());
        let reader = SharedDriver::new(presence.clone());

        let handle = writer
            .create(RoomListing::new("r1", "chat", "proc-1"))
            .await
            .unwrap();
        handle
            .update_one(CacheUpdate::default().inc("clients", 1))
            .await
            .unwrap();

        assert!(reader.has("r1").await.unwrap());
        let found = reader
            .find_one(&conditions(&[("name", json!("chat"))]), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.clients, 1);
        assert_eq!(found.process_id, "proc-1");

        handle.remove().await.unwrap();
        assert!(!reader.has("r1").await.unwrap());
    }

    #[tokio::test]
    async fn prefilter_false_positives_are_rejected_by_parse() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver = SharedDriver::new(presence);

        // metadata embeds the exact substring the pre-filter looks for
        let mut tricky = RoomListing::new("r1", "chat", "proc-1");
        tricky.metadata = Some(json!({"note": "\"name\":\"poker\""}));
        driver.create(tricky).await.unwrap();

        let found = driver
            .query(&conditions(&[("name", json!("poker"))]), None)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn query_without_name_scans_everything() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver = SharedDriver::new(presence);
        driver
            .create(RoomListing::new("r1", "chat", "proc-1"))
            .await
            .unwrap();
        driver
            .create(RoomListing::new("r2", "poker", "proc-2"))
            .await
            .unwrap();

        let all = driver.query(&Conditions::new(), None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_batches_large_removals() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver = SharedDriver::new(presence.clone());

        for i in 0..1203 {
            driver
                .create(RoomListing::new(format!("dead-{i}"), "chat", "dead-proc"))
                .await
                .unwrap();
        }
        driver
            .create(RoomListing::new("alive", "chat", "live-proc"))
            .await
            .unwrap();

        let removed = driver.cleanup("dead-proc").await.unwrap();
        assert_eq!(removed, 1203);
        assert_eq!(presence.hlen(ROOMCACHES_KEY).await.unwrap(), 1);
        assert!(driver.has("alive").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_queries_share_one_fetch() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver = Arc::new(SharedDriver::new(presence));
        driver
            .create(RoomListing::new("r1", "chat", "proc-1"))
            .await
            .unwrap();

        let lookups = (0..16).map(|_| {
            let driver = driver.clone();
            async move {
                driver
                    .query(&conditions(&[("name", json!("chat"))]), None)
                    .await
                    .unwrap()
                    .len()
            }
        });
        let counts = futures_util::future::join_all(lookups).await;
        assert!(counts.into_iter().all(|count| count == 1));
    }
}
