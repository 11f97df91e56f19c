//! Registry of running point runtimes

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use voltage_model::{DataPointConfig, PointId};

use crate::error::{Result, RtdbError};
use crate::runtime::PointRuntime;
use crate::time::TimeProvider;
use crate::traits::PointValueStore;

/// Starts, stops and looks up `PointRuntime`s by point id
pub struct RuntimeManager {
    store: Arc<dyn PointValueStore>,
    time: Arc<dyn TimeProvider>,
    default_cache_size: usize,
    runtimes: DashMap<PointId, Arc<PointRuntime>>,
}

impl RuntimeManager {
    pub fn new(
        store: Arc<dyn PointValueStore>,
        time: Arc<dyn TimeProvider>,
        default_cache_size: usize,
    ) -> Self {
        Self {
            store,
            time,
            default_cache_size,
            runtimes: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PointValueStore> {
        &self.store
    }

    /// Initialize and start a runtime for `point`
    pub async fn start_point(&self, point: DataPointConfig) -> Result<Arc<PointRuntime>> {
        let id = point.id;
        if self.runtimes.contains_key(&id) {
            return Err(RtdbError::PointAlreadyRunning(id));
        }

        let runtime = PointRuntime::initialize(
            point,
            Arc::clone(&self.store),
            Arc::clone(&self.time),
            self.default_cache_size,
        )
        .await?;

        // A concurrent start may have won while we were loading
        let inserted = match self.runtimes.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(Arc::clone(&runtime));
                true
            },
        };
        if !inserted {
            runtime.terminate().await;
            return Err(RtdbError::PointAlreadyRunning(id));
        }

        runtime.start();
        info!(point_id = id, "Point started");
        Ok(runtime)
    }

    /// Stop and unregister a runtime, returning whether it was running
    pub async fn stop_point(&self, id: PointId) -> bool {
        let Some((_, runtime)) = self.runtimes.remove(&id) else {
            return false;
        };
        runtime.terminate().await;
        info!(point_id = id, "Point stopped");
        true
    }

    pub fn get_point_runtime(&self, id: PointId) -> Option<Arc<PointRuntime>> {
        self.runtimes.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn running_points(&self) -> Vec<PointId> {
        let mut ids: Vec<PointId> = self.runtimes.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    /// Stop every runtime, then flush pending async writes
    pub async fn stop_all(&self) -> Result<()> {
        for id in self.running_points() {
            self.stop_point(id).await;
        }
        let flushed = self.store.flush_pending().await?;
        info!(flushed, "All points stopped");
        Ok(())
    }
}
