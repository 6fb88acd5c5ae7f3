//! Per-process room/CCU counters and the fleet-wide process registry.
//!
//! Counters update synchronously from room lifecycle hooks and are flushed
//! to the shared `roomcount` hash at most once per second. Fleet reads
//! substitute the local entry so a process never acts on a stale view of
//! itself. Excluding a process removes its registry entry and reaps the room
//! caches it left behind.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::driver::Driver;
use crate::presence::Presence;
use crate::protocol::ProcessId;

/// Hash of `processId → "<roomCount>,<ccu>"`.
pub const ROOM_COUNT_KEY: &str = "roomcount";

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// One process's registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStats {
    pub process_id: ProcessId,
    pub room_count: u32,
    pub ccu: u32,
}

impl ProcessStats {
    fn parse(process_id: &str, raw: &str) -> Option<Self> {
        let (rooms, ccu) = raw.split_once(',')?;
        Some(Self {
            process_id: process_id.to_string(),
            room_count: rooms.parse().ok()?,
            ccu: ccu.parse().ok()?,
        })
    }
}

#[derive(Clone)]
pub struct Stats {
    inner: Arc<StatsInner>,
}

struct StatsInner {
    process_id: ProcessId,
    presence: Arc<dyn Presence>,
    driver: Arc<dyn Driver>,
    room_count: AtomicU32,
    ccu: AtomicU32,
    flush_scheduled: AtomicBool,
    /// Set once the process leaves the registry; no flush may re-add it.
    closed: AtomicBool,
}

impl Stats {
    pub fn new(
        process_id: ProcessId,
        presence: Arc<dyn Presence>,
        driver: Arc<dyn Driver>,
    ) -> Self {
        Self {
            inner: Arc::new(StatsInner {
                process_id,
                presence,
                driver,
                room_count: AtomicU32::new(0),
                ccu: AtomicU32::new(0),
                flush_scheduled: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn process_id(&self) -> &str {
        &self.inner.process_id
    }

    pub fn room_count(&self) -> u32 {
        self.inner.room_count.load(Ordering::SeqCst)
    }

    pub fn ccu(&self) -> u32 {
        self.inner.ccu.load(Ordering::SeqCst)
    }

    pub fn increment_room_count(&self) -> u32 {
        let next = self.inner.room_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.persist();
        next
    }

    pub fn decrement_room_count(&self) -> u32 {
        let previous = self
            .inner
            .room_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        self.persist();
        previous.saturating_sub(1)
    }

    pub fn increment_ccu(&self) {
        self.inner.ccu.fetch_add(1, Ordering::SeqCst);
        self.persist();
    }

    pub fn decrement_ccu(&self) {
        let _ = self
            .inner
            .ccu
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            });
        self.persist();
    }

    /// Schedule a deferred flush; concurrent updates within the window
    /// coalesce into a single write of the latest values.
    fn persist(&self) {
        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FLUSH_INTERVAL).await;
            inner.flush_scheduled.store(false, Ordering::SeqCst);
            Self::write_entry(&inner).await;
        });
    }

    /// Write the registry entry immediately.
    pub async fn flush_now(&self) {
        Self::write_entry(&self.inner).await;
    }

    async fn write_entry(inner: &StatsInner) {
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let value = format!(
            "{},{}",
            inner.room_count.load(Ordering::SeqCst),
            inner.ccu.load(Ordering::SeqCst)
        );
        if let Err(error) = inner
            .presence
            .hset(ROOM_COUNT_KEY, &inner.process_id, value)
            .await
        {
            tracing::warn!(%error, "Failed to flush process stats");
        }
    }

    /// The fleet view, with the local entry substituted for freshness.
    pub async fn fetch_all(&self) -> Vec<ProcessStats> {
        let fields = self
            .inner
            .presence
            .hgetall(ROOM_COUNT_KEY)
            .await
            .unwrap_or_default();
        let mut all: Vec<ProcessStats> = fields
            .iter()
            .filter(|(process_id, _)| process_id.as_str() != self.inner.process_id)
            .filter_map(|(process_id, raw)| ProcessStats::parse(process_id, raw))
            .collect();
        all.push(ProcessStats {
            process_id: self.inner.process_id.clone(),
            room_count: self.room_count(),
            ccu: self.ccu(),
        });
        all
    }

    /// Sum of connected clients across the fleet.
    pub async fn global_ccu(&self) -> u64 {
        self.fetch_all()
            .await
            .into_iter()
            .map(|stats| u64::from(stats.ccu))
            .sum()
    }

    /// Drop a process from the registry and reap the room caches it owned.
    pub async fn exclude_process(&self, process_id: &str) -> anyhow::Result<usize> {
        self.inner.presence.hdel(ROOM_COUNT_KEY, process_id).await?;
        let removed = self.inner.driver.cleanup(process_id).await?;
        tracing::info!(%process_id, rooms_cleaned = removed, "Excluded process from matchmaking");
        Ok(removed)
    }

    /// Remove our own registry entry (graceful shutdown). Later deferred
    /// flushes become no-ops so the entry stays gone.
    pub async fn clear_local_entry(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Err(error) = self
            .inner
            .presence
            .hdel(ROOM_COUNT_KEY, &self.inner.process_id)
            .await
        {
            tracing::warn!(%error, "Failed to remove own stats entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{LocalDriver, RoomListing};
    use crate::presence::LocalPresence;

    fn stats_with(presence: Arc<dyn Presence>, driver: Arc<dyn Driver>) -> Stats {
        Stats::new("proc-local".to_string(), presence, driver)
    }

    #[tokio::test(start_paused = true)]
    async fn updates_coalesce_into_one_deferred_flush() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
        let stats = stats_with(presence.clone(), driver);

        stats.increment_room_count();
        stats.increment_ccu();
        stats.increment_ccu();

        // nothing written until the flush window elapses
        assert!(presence
            .hget(ROOM_COUNT_KEY, "proc-local")
            .await
            .unwrap()
            .is_none());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            presence
                .hget(ROOM_COUNT_KEY, "proc-local")
                .await
                .unwrap()
                .as_deref(),
            Some("1,2")
        );
    }

    #[tokio::test]
    async fn fetch_all_substitutes_the_local_entry() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
        let stats = stats_with(presence.clone(), driver);

        // stale persisted view of ourselves and a fresh peer entry
        presence
            .hset(ROOM_COUNT_KEY, "proc-local", "9,9".into())
            .await
            .unwrap();
        presence
            .hset(ROOM_COUNT_KEY, "proc-peer", "2,7".into())
            .await
            .unwrap();

        stats.increment_room_count();

        let mut all = stats.fetch_all().await;
        all.sort_by(|a, b| a.process_id.cmp(&b.process_id));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].process_id, "proc-local");
        assert_eq!(all[0].room_count, 1);
        assert_eq!(all[0].ccu, 0);
        assert_eq!(all[1].process_id, "proc-peer");
        assert_eq!(all[1].room_count, 2);

        assert_eq!(stats.global_ccu().await, 7);
    }

    #[tokio::test]
    async fn exclude_process_removes_entry_and_room_caches() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver = Arc::new(LocalDriver::new());
        driver
            .create(RoomListing::new("r1", "chat", "proc-dead"))
            .await
            .unwrap();
        driver
            .create(RoomListing::new("r2", "chat", "proc-live"))
            .await
            .unwrap();
        presence
            .hset(ROOM_COUNT_KEY, "proc-dead", "1,3".into())
            .await
            .unwrap();

        let stats = stats_with(presence.clone(), driver.clone());
        let removed = stats.exclude_process("proc-dead").await.unwrap();
        assert_eq!(removed, 1);

        assert!(presence
            .hget(ROOM_COUNT_KEY, "proc-dead")
            .await
            .unwrap()
            .is_none());
        assert!(!stats
            .fetch_all()
            .await
            .iter()
            .any(|s| s.process_id == "proc-dead"));
        assert!(driver.has("r2").await.unwrap());
        assert!(!driver.has("r1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_flush_cannot_resurrect_a_cleared_entry() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
        let stats = stats_with(presence.clone(), driver);

        // a flush is pending when the process leaves the registry
        stats.increment_ccu();
        stats.clear_local_entry().await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(presence
            .hget(ROOM_COUNT_KEY, "proc-local")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn malformed_registry_entries_are_skipped() {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
        presence
            .hset(ROOM_COUNT_KEY, "proc-bad", "garbage".into())
            .await
            .unwrap();

        let stats = stats_with(presence, driver);
        let all = stats.fetch_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].process_id, "proc-local");
    }
}
