//! Event lifecycle notifications
//!
//! `EventNotifier` persists each event change, mirrors it into the
//! [`UserEventCache`] of every user in `ids_to_notify`, then fans it out to
//! the registered listeners.

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::debug;
use voltage_model::{EventInstance, ReturnCause, UserId};

use crate::cache::UserEventCache;
use crate::error::Result;
use crate::multicast::{UserEventListener, UserEventMulticaster};
use crate::store::{EventPurge, EventStore};

pub struct EventNotifier {
    store: Arc<dyn EventStore>,
    cache: Arc<UserEventCache>,
    multicaster: ArcSwapOption<UserEventMulticaster>,
}

impl EventNotifier {
    pub fn new(store: Arc<dyn EventStore>, cache: Arc<UserEventCache>) -> Self {
        Self {
            store,
            cache,
            multicaster: ArcSwapOption::empty(),
        }
    }

    pub fn cache(&self) -> &Arc<UserEventCache> {
        &self.cache
    }

    pub fn add_listener(&self, listener: Arc<dyn UserEventListener>) {
        self.multicaster.rcu(|current| {
            Some(Arc::new(UserEventMulticaster::add(
                current.as_deref(),
                Arc::clone(&listener),
            )))
        });
    }

    pub fn remove_listener(&self, listener: &Arc<dyn UserEventListener>) {
        self.multicaster.rcu(|current| {
            current
                .as_deref()
                .and_then(|m| UserEventMulticaster::remove(m, listener))
                .map(Arc::new)
        });
    }

    pub fn listener_count(&self) -> usize {
        self.multicaster
            .load()
            .as_deref()
            .map_or(0, UserEventMulticaster::listener_count)
    }

    /// Persist a new event and notify its users
    pub async fn raise(&self, event: EventInstance) -> Result<()> {
        self.store.save_event(&event).await?;
        for &user_id in &event.ids_to_notify {
            self.cache.add_event(user_id, event.clone());
        }
        debug!(event_id = event.id, level = ?event.alarm_level, "Event raised");
        match self.multicaster.load_full() {
            Some(m) => m.raised(&event),
            None => Ok(()),
        }
    }

    pub async fn acknowledge(
        &self,
        event: &mut EventInstance,
        time: i64,
        user_id: Option<UserId>,
    ) -> Result<()> {
        if event.is_acknowledged() {
            return Ok(());
        }
        event.acknowledge(time, user_id);
        self.publish_change(event).await?;
        match self.multicaster.load_full() {
            Some(m) => m.acknowledged(event),
            None => Ok(()),
        }
    }

    pub async fn return_to_normal(
        &self,
        event: &mut EventInstance,
        time: i64,
        cause: ReturnCause,
    ) -> Result<()> {
        if !event.is_active() {
            return Ok(());
        }
        event.return_to_normal(time, cause);
        self.publish_change(event).await?;
        let Some(m) = self.multicaster.load_full() else {
            return Ok(());
        };
        match cause {
            ReturnCause::SourceDisabled => m.deactivated(event),
            ReturnCause::ReturnToNormal => m.returned_to_normal(event),
        }
    }

    /// Delete events from the store, then from every loaded cache entry
    pub async fn purge(&self, purge: EventPurge) -> Result<usize> {
        self.cache.purge(purge).await
    }

    /// Return the event to normal because its source was disabled
    pub async fn deactivate(&self, event: &mut EventInstance, time: i64) -> Result<()> {
        self.return_to_normal(event, time, ReturnCause::SourceDisabled)
            .await
    }

    async fn publish_change(&self, event: &EventInstance) -> Result<()> {
        self.store.save_event(event).await?;
        for &user_id in &event.ids_to_notify {
            self.cache.update_event(user_id, event);
        }
        Ok(())
    }
}
