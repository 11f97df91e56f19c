//! VoltageEMS User Events
//!
//! - **UserEventCache**: per-user cache of unsilenced events with TTL eviction
//! - **UserEventMulticaster**: copy-on-write listener list with per-user filtering
//! - **EventNotifier**: raise / acknowledge / return-to-normal entry point that
//!   keeps store, cache and listeners in step
//! - **EventStore**: persistence seam, with an in-memory implementation

pub mod cache;
pub mod config;
pub mod error;
pub mod multicast;
pub mod notifier;
pub mod store;

pub use cache::UserEventCache;
pub use config::EventCacheConfig;
pub use error::{EventError, Result};
pub use multicast::{UserEventListener, UserEventMulticaster};
pub use notifier::EventNotifier;
pub use store::{EventPurge, EventStore, MemoryEventStore};
