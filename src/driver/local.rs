use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{sort_listings, CacheUpdate, Conditions, Driver, RoomCacheHandle, RoomListing, SortOptions};
use crate::protocol::RoomId;

type SharedRooms = Arc<RwLock<HashMap<RoomId, Arc<RwLock<RoomListing>>>>>;

/// In-memory driver for single-process deployments and tests.
#[derive(Default)]
pub struct LocalDriver {
    rooms: SharedRooms,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Vec<RoomListing> {
        self.rooms
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .map(|entry| {
                entry
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone()
            })
            .collect()
    }
}

struct LocalCacheHandle {
    room_id: RoomId,
    entry: Arc<RwLock<RoomListing>>,
    rooms: SharedRooms,
}

#[async_trait]
impl RoomCacheHandle for LocalCacheHandle {
    fn listing(&self) -> RoomListing {
        self.entry
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn save(&self) -> anyhow::Result<()> {
        // entries share storage with the driver; nothing to flush
        Ok(())
    }

    async fn update_one(&self, update: CacheUpdate) -> anyhow::Result<()> {
        self.entry
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .apply(&update)
    }

    async fn remove(&self) -> anyhow::Result<()> {
        self.rooms
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&self.room_id);
        Ok(())
    }
}

#[async_trait]
impl Driver for LocalDriver {
    async fn create(&self, listing: RoomListing) -> anyhow::Result<Arc<dyn RoomCacheHandle>> {
        let room_id = listing.room_id.clone();
        let entry = Arc::new(RwLock::new(listing));
        self.rooms
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(room_id.clone(), entry.clone());
        Ok(Arc::new(LocalCacheHandle {
            room_id,
            entry,
            rooms: self.rooms.clone(),
        }))
    }

    async fn has(&self, room_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .rooms
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(room_id))
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
        let mut listings: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|listing| listing.matches(conditions))
            .collect();
        if let Some(sort) = sort {
            sort_listings(&mut listings, sort);
        }
        Ok(listings)
    }

    async fn cleanup(&self, process_id: &str) -> anyhow::Result<usize> {
        let mut rooms = self
            .rooms
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = rooms.len();
        rooms.retain(|_, entry| {
            entry
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .process_id
                != process_id
        });
        Ok(before - rooms.len())
    }
}
