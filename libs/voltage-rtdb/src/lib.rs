//! VoltageEMS Point-Value Storage
//!
//! Per-point value caching in front of a pluggable time-series store.
//!
//! # Key Components
//!
//! - **PointValueStore trait**: durable, time-ordered point-value storage
//! - **MemoryPointValueStore**: in-memory backend with batched async writes
//! - **PointValueCache**: bounded, time-descending window of recent values
//! - **PointRuntime**: logging policy and query layer of one enabled point
//! - **RuntimeManager**: "get point runtime by id" registry

pub mod cache;

pub mod error;

pub mod manager;

pub mod memory_impl;

pub mod runtime;

pub mod time;

pub mod traits;

pub mod write_buffer;

// Re-exports
pub use cache::PointValueCache;
pub use error::{Result, RtdbError};
pub use manager::RuntimeManager;
pub use memory_impl::{MemoryPointValueStore, MemoryStats};
pub use runtime::{IntervalState, PointRuntime};
pub use time::{FixedTimeProvider, ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use traits::PointValueStore;
pub use write_buffer::{
    WriteBuffer, WriteBufferConfig, WriteBufferStats, WriteBufferStatsSnapshot,
};

/// Helper functions for common operations
pub mod helpers {
    use super::{MemoryPointValueStore, PointValueStore};
    use std::sync::Arc;
    use voltage_model::{DataPointConfig, DataType, PointId, PointValueTime};

    // ==================== Test Support ====================

    /// Create an in-memory store for unit testing
    ///
    /// # Example
    /// ```
    /// use voltage_rtdb::helpers::create_test_store;
    ///
    /// let store = create_test_store();
    /// // Use store in tests...
    /// ```
    pub fn create_test_store() -> Arc<dyn PointValueStore> {
        Arc::new(MemoryPointValueStore::new())
    }

    /// Create a concrete in-memory store when tests need to inspect it
    pub fn create_test_memory_store() -> Arc<MemoryPointValueStore> {
        Arc::new(MemoryPointValueStore::new())
    }

    /// Numeric on-change point with the given id
    pub fn create_test_point(id: PointId) -> DataPointConfig {
        DataPointConfig::new(id, DataType::Numeric)
    }

    /// Numeric samples `value == time` at each of `times`
    pub fn numeric_series(times: impl IntoIterator<Item = i64>) -> Vec<PointValueTime> {
        times
            .into_iter()
            .map(|t| PointValueTime::numeric(t as f64, t))
            .collect()
    }
}
