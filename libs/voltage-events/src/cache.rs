//! Per-user cache of unsilenced events
//!
//! A user's entry is loaded from the [`EventStore`] on the first
//! `get_all_events` call and kept in sync by the event notifier afterwards.
//! Entries idle for longer than the time-to-live are dropped by `clean`.

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use voltage_model::{AlarmLevel, EventInstance, UserId};
use voltage_rtdb::TimeProvider;

use crate::error::Result;
use crate::store::{EventPurge, EventStore};

#[derive(Debug)]
struct UserEventCacheEntry {
    events: BTreeMap<i64, EventInstance>,
    last_accessed: i64,
}

impl UserEventCacheEntry {
    fn touch(&mut self, now: i64) {
        self.last_accessed = now;
    }

    fn retain(&mut self, keep: impl Fn(&EventInstance) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(|_, e| keep(e));
        before - self.events.len()
    }
}

pub struct UserEventCache {
    entries: DashMap<UserId, UserEventCacheEntry>,
    store: Arc<dyn EventStore>,
    time: Arc<dyn TimeProvider>,
    time_to_live_ms: i64,
    cleaning: AtomicBool,
}

impl UserEventCache {
    pub fn new(store: Arc<dyn EventStore>, time: Arc<dyn TimeProvider>, time_to_live: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            time,
            time_to_live_ms: time_to_live.as_millis() as i64,
            cleaning: AtomicBool::new(false),
        }
    }

    /// Every cached event of the user, ordered by id
    ///
    /// Loads the entry from the store on first access.
    pub async fn get_all_events(&self, user_id: UserId) -> Result<Vec<EventInstance>> {
        let now = self.time.now_millis();
        if let Some(mut entry) = self.entries.get_mut(&user_id) {
            entry.touch(now);
            return Ok(entry.events.values().cloned().collect());
        }

        let loaded = self.store.unsilenced_events(user_id).await?;
        debug!(user_id, count = loaded.len(), "User event cache loaded");

        // A concurrent loader may have won; its entry can hold newer changes
        let mut entry = self
            .entries
            .entry(user_id)
            .or_insert_with(|| UserEventCacheEntry {
                events: loaded.into_iter().map(|e| (e.id, e)).collect(),
                last_accessed: now,
            });
        entry.touch(now);
        Ok(entry.events.values().cloned().collect())
    }

    /// Add an event to a loaded entry; unloaded users pick it up from the
    /// store on their next read
    pub fn add_event(&self, user_id: UserId, event: EventInstance) {
        let now = self.time.now_millis();
        if let Some(mut entry) = self.entries.get_mut(&user_id) {
            entry.touch(now);
            entry.events.insert(event.id, event);
        }
    }

    /// Replace a cached event; no-op if the user or event is not cached
    pub fn update_event(&self, user_id: UserId, event: &EventInstance) {
        let now = self.time.now_millis();
        if let Some(mut entry) = self.entries.get_mut(&user_id) {
            entry.touch(now);
            if let Some(cached) = entry.events.get_mut(&event.id) {
                *cached = event.clone();
            }
        }
    }

    pub fn remove_event(&self, user_id: UserId, event_id: i64) -> Option<EventInstance> {
        let now = self.time.now_millis();
        let mut entry = self.entries.get_mut(&user_id)?;
        entry.touch(now);
        entry.events.remove(&event_id)
    }

    // ========================================================================
    // Purges
    // ========================================================================

    /// Remove events raised before `time` from the store and every user
    pub async fn purge_events_before(&self, time: i64) -> Result<usize> {
        self.purge(EventPurge::Before(time)).await
    }

    pub async fn purge_events_before_level(&self, time: i64, level: AlarmLevel) -> Result<usize> {
        self.purge(EventPurge::BeforeLevel(time, level)).await
    }

    pub async fn purge_events_before_type(&self, time: i64, type_name: &str) -> Result<usize> {
        self.purge(EventPurge::BeforeType(time, type_name.to_string()))
            .await
    }

    /// Delete every event; loaded entries stay loaded but empty
    pub async fn purge_all_events(&self) -> Result<usize> {
        self.purge(EventPurge::All).await
    }

    /// Purge the store, then the loaded entries
    ///
    /// Returns the number of cached events removed. A store failure leaves
    /// the cache untouched.
    pub async fn purge(&self, purge: EventPurge) -> Result<usize> {
        let stored = self.store.purge_events(&purge).await?;
        let mut removed = 0;
        for mut entry in self.entries.iter_mut() {
            removed += entry.retain(|e| !purge.matches(e));
        }
        if stored > 0 || removed > 0 {
            info!(stored, cached = removed, "Purged events");
        }
        Ok(removed)
    }

    // ========================================================================
    // TTL eviction
    // ========================================================================

    /// Drop entries idle for longer than the time-to-live
    ///
    /// Only one clean runs at a time; an overlapping call is skipped and
    /// returns 0.
    pub fn clean(&self) -> usize {
        if self.cleaning.swap(true, Ordering::AcqRel) {
            warn!("User event cache clean already running, skipped");
            return 0;
        }
        let _running = CleanGuard(&self.cleaning);

        let now = self.time.now_millis();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now - entry.last_accessed <= self.time_to_live_ms);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted idle user event cache entries");
        }
        evicted
    }

    /// Run `clean` every `period` until `shutdown` is notified
    pub async fn cleaner_loop_with_shutdown(&self, period: Duration, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    debug!("User event cache cleaner stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.clean();
                }
            }
        }
    }

    pub fn user_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.entries.contains_key(&user_id)
    }

    /// Copy of every loaded entry, for diagnostics
    pub fn snapshot(&self) -> HashMap<UserId, Vec<EventInstance>> {
        self.entries
            .iter()
            .map(|e| (*e.key(), e.events.values().cloned().collect()))
            .collect()
    }
}

struct CleanGuard<'a>(&'a AtomicBool);

impl Drop for CleanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::store::MemoryEventStore;
    use tracing_test::traced_test;
    use voltage_rtdb::ManualTimeProvider;

    fn event(id: i64, level: AlarmLevel, active: i64) -> EventInstance {
        EventInstance::new(id, "DATA_POINT", level, active).notify([1])
    }

    async fn cache_with(events: &[EventInstance]) -> (UserEventCache, Arc<ManualTimeProvider>) {
        let store = Arc::new(MemoryEventStore::new());
        for e in events {
            store.save_event(e).await.unwrap();
        }
        let time = Arc::new(ManualTimeProvider::new(0));
        let cache = UserEventCache::new(store, time.clone(), Duration::from_secs(60));
        (cache, time)
    }

    #[tokio::test]
    async fn test_lazy_load_then_cached() {
        let (cache, _) = cache_with(&[event(1, AlarmLevel::Urgent, 10)]).await;
        assert!(!cache.contains_user(1));
        assert_eq!(cache.get_all_events(1).await.unwrap().len(), 1);
        assert!(cache.contains_user(1));

        cache.add_event(1, event(2, AlarmLevel::Warning, 20));
        let ids: Vec<_> = cache.get_all_events(1).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_add_to_unloaded_user_is_ignored() {
        let (cache, _) = cache_with(&[]).await;
        cache.add_event(5, event(1, AlarmLevel::Urgent, 10));
        assert!(!cache.contains_user(5));
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let (cache, _) = cache_with(&[event(1, AlarmLevel::Urgent, 10)]).await;
        cache.get_all_events(1).await.unwrap();

        let mut changed = event(1, AlarmLevel::Urgent, 10);
        changed.acknowledge(50, Some(1));
        cache.update_event(1, &changed);
        assert!(cache.get_all_events(1).await.unwrap()[0].is_acknowledged());

        assert!(cache.remove_event(1, 1).is_some());
        assert!(cache.get_all_events(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purges() {
        let events = [
            event(1, AlarmLevel::Urgent, 10),
            event(2, AlarmLevel::Warning, 20),
            event(3, AlarmLevel::Urgent, 30),
        ];
        let (cache, _) = cache_with(&events).await;
        cache.get_all_events(1).await.unwrap();

        assert_eq!(
            cache
                .purge_events_before_level(25, AlarmLevel::Warning)
                .await
                .unwrap(),
            1
        );
        assert_eq!(cache.purge_events_before_type(25, "SYSTEM").await.unwrap(), 0);
        assert_eq!(cache.purge_events_before(25).await.unwrap(), 1);
        let ids: Vec<_> = cache.get_all_events(1).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3]);

        assert_eq!(cache.purge_all_events().await.unwrap(), 1);
        assert!(cache.contains_user(1));
    }

    #[tokio::test]
    async fn test_purge_reaches_store_of_unloaded_users() {
        let store = Arc::new(MemoryEventStore::new());
        store.save_event(&event(1, AlarmLevel::Urgent, 10)).await.unwrap();
        store.save_event(&event(2, AlarmLevel::Urgent, 30)).await.unwrap();
        let cache = UserEventCache::new(
            store.clone(),
            Arc::new(ManualTimeProvider::new(0)),
            Duration::from_secs(60),
        );

        // Nobody is loaded, so only the store changes
        assert_eq!(cache.purge_events_before(20).await.unwrap(), 0);
        assert!(store.event(1).is_none());
        let ids: Vec<_> = cache.get_all_events(1).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_failed_store_purge_keeps_cache() {
        let store = Arc::new(MemoryEventStore::new());
        store.save_event(&event(1, AlarmLevel::Urgent, 10)).await.unwrap();
        let cache = UserEventCache::new(
            store.clone(),
            Arc::new(ManualTimeProvider::new(0)),
            Duration::from_secs(60),
        );
        cache.get_all_events(1).await.unwrap();

        store.fail(true);
        assert!(cache.purge_all_events().await.is_err());
        store.fail(false);
        assert_eq!(cache.get_all_events(1).await.unwrap().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_clean_evicts_idle_entries() {
        let (cache, time) = cache_with(&[]).await;
        cache.get_all_events(1).await.unwrap();
        time.set(30_000);
        cache.get_all_events(2).await.unwrap();

        time.set(60_000);
        assert_eq!(cache.clean(), 0);

        time.set(60_001);
        assert_eq!(cache.clean(), 1);
        assert!(!cache.contains_user(1));
        assert!(cache.contains_user(2));
    }

    #[tokio::test]
    async fn test_access_refreshes_ttl() {
        let (cache, time) = cache_with(&[]).await;
        cache.get_all_events(1).await.unwrap();
        time.set(50_000);
        cache.remove_event(1, 99);
        time.set(100_000);
        assert_eq!(cache.clean(), 0);
        assert!(cache.contains_user(1));
    }

    #[tokio::test]
    async fn test_store_failure_creates_no_entry() {
        let store = Arc::new(MemoryEventStore::new());
        store.fail(true);
        let cache = UserEventCache::new(
            store,
            Arc::new(ManualTimeProvider::new(0)),
            Duration::from_secs(60),
        );
        assert!(cache.get_all_events(1).await.is_err());
        assert_eq!(cache.user_count(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_overlapping_clean_is_skipped() {
        let (cache, time) = cache_with(&[]).await;
        cache.get_all_events(1).await.unwrap();
        time.set(120_000);

        cache.cleaning.store(true, Ordering::Release);
        assert_eq!(cache.clean(), 0);
        assert!(logs_contain("clean already running"));
        assert!(cache.contains_user(1));

        cache.cleaning.store(false, Ordering::Release);
        assert_eq!(cache.clean(), 1);
    }
}
