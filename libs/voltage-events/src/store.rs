//! Event persistence seam

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use voltage_model::{AlarmLevel, EventInstance, UserId};

use crate::error::{EventError, Result};

/// Selects the events a purge deletes
#[derive(Debug, Clone, PartialEq)]
pub enum EventPurge {
    /// Raised before the time
    Before(i64),
    /// Raised before the time at the given level
    BeforeLevel(i64, AlarmLevel),
    /// Raised before the time with the given type name
    BeforeType(i64, String),
    All,
}

impl EventPurge {
    /// True when the purge deletes `event`
    pub fn matches(&self, event: &EventInstance) -> bool {
        match self {
            EventPurge::Before(time) => event.active_timestamp < *time,
            EventPurge::BeforeLevel(time, level) => {
                event.active_timestamp < *time && event.alarm_level == *level
            },
            EventPurge::BeforeType(time, type_name) => {
                event.active_timestamp < *time && event.type_name == *type_name
            },
            EventPurge::All => true,
        }
    }
}

/// Durable storage of raised events
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Insert or replace an event
    async fn save_event(&self, event: &EventInstance) -> Result<()>;

    /// Events visible to the user that the user has not silenced
    async fn unsilenced_events(&self, user_id: UserId) -> Result<Vec<EventInstance>>;

    /// Delete the selected events, returning how many were removed
    async fn purge_events(&self, purge: &EventPurge) -> Result<usize>;
}

/// In-memory event store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<BTreeMap<i64, EventInstance>>,
    silenced: RwLock<HashSet<(UserId, i64)>>,
    fail: AtomicBool,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn silence(&self, user_id: UserId, event_id: i64) {
        self.silenced.write().insert((user_id, event_id));
    }

    pub fn unsilence(&self, user_id: UserId, event_id: i64) {
        self.silenced.write().remove(&(user_id, event_id));
    }

    /// Make every call fail, for error-path tests
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn event(&self, id: i64) -> Option<EventInstance> {
        self.events.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EventError::Store("event store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn save_event(&self, event: &EventInstance) -> Result<()> {
        self.check()?;
        self.events.write().insert(event.id, event.clone());
        Ok(())
    }

    async fn unsilenced_events(&self, user_id: UserId) -> Result<Vec<EventInstance>> {
        self.check()?;
        let silenced = self.silenced.read();
        Ok(self
            .events
            .read()
            .values()
            .filter(|e| e.should_notify(user_id) && !silenced.contains(&(user_id, e.id)))
            .cloned()
            .collect())
    }

    async fn purge_events(&self, purge: &EventPurge) -> Result<usize> {
        self.check()?;
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|_, e| !purge.matches(e));
        let removed = before - events.len();
        drop(events);
        if removed > 0 {
            let events = self.events.read();
            self.silenced.write().retain(|(_, id)| events.contains_key(id));
        }
        Ok(removed)
    }
}
