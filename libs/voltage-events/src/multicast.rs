//! Fan-out of event notifications to user listeners
//!
//! A multicaster is an immutable list of listeners. `add` and `remove`
//! build a new list, so a dispatch in progress keeps working on the list it
//! started with.

use std::fmt;
use std::sync::Arc;
use tracing::warn;
use voltage_model::{EventInstance, UserId};

use crate::error::{EventError, Result};

/// Receives event notifications for one user
pub trait UserEventListener: Send + Sync {
    fn user_id(&self) -> UserId;

    fn raised(&self, event: &EventInstance) -> Result<()>;

    fn acknowledged(&self, event: &EventInstance) -> Result<()>;

    fn returned_to_normal(&self, event: &EventInstance) -> Result<()>;

    fn deactivated(&self, event: &EventInstance) -> Result<()>;
}

#[derive(Clone)]
pub struct UserEventMulticaster {
    listeners: Arc<[Arc<dyn UserEventListener>]>,
}

impl UserEventMulticaster {
    /// `current` plus `listener`
    pub fn add(current: Option<&Self>, listener: Arc<dyn UserEventListener>) -> Self {
        let listeners: Arc<[Arc<dyn UserEventListener>]> = match current {
            Some(m) => m.listeners.iter().cloned().chain([listener]).collect(),
            None => Arc::from(vec![listener]),
        };
        Self { listeners }
    }

    /// `current` without one occurrence of `listener`, compared by identity
    ///
    /// A listener added twice must be removed twice. Returns `None` when no
    /// listener is left.
    pub fn remove(current: &Self, listener: &Arc<dyn UserEventListener>) -> Option<Self> {
        let Some(index) = current.listeners.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return Some(current.clone());
        };
        let mut listeners = current.listeners.to_vec();
        listeners.remove(index);
        (!listeners.is_empty()).then(|| Self {
            listeners: Arc::from(listeners),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn contains(&self, listener: &Arc<dyn UserEventListener>) -> bool {
        self.listeners.iter().any(|l| Arc::ptr_eq(l, listener))
    }

    pub fn raised(&self, event: &EventInstance) -> Result<()> {
        self.dispatch(event, "raised", |l, e| l.raised(e))
    }

    pub fn acknowledged(&self, event: &EventInstance) -> Result<()> {
        self.dispatch(event, "acknowledged", |l, e| l.acknowledged(e))
    }

    pub fn returned_to_normal(&self, event: &EventInstance) -> Result<()> {
        self.dispatch(event, "returned_to_normal", |l, e| l.returned_to_normal(e))
    }

    pub fn deactivated(&self, event: &EventInstance) -> Result<()> {
        self.dispatch(event, "deactivated", |l, e| l.deactivated(e))
    }

    /// Call every listener whose user may see the event; failures are
    /// collected instead of stopping delivery
    fn dispatch(
        &self,
        event: &EventInstance,
        kind: &'static str,
        call: impl Fn(&dyn UserEventListener, &EventInstance) -> Result<()>,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for listener in self.listeners.iter() {
            if !event.should_notify(listener.user_id()) {
                continue;
            }
            if let Err(e) = call(listener.as_ref(), event) {
                warn!(
                    event_id = event.id,
                    user_id = listener.user_id(),
                    kind,
                    error = %e,
                    "Event listener failed"
                );
                failures.push(e);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EventError::Dispatch(failures))
        }
    }
}

impl fmt::Debug for UserEventMulticaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let users: Vec<UserId> = self.listeners.iter().map(|l| l.user_id()).collect();
        f.debug_struct("UserEventMulticaster")
            .field("users", &users)
            .finish()
    }
}
