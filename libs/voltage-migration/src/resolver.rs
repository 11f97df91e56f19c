//! Series to data point lookup

use parking_lot::RwLock;
use std::collections::BTreeMap;
use voltage_model::{DataPointConfig, SeriesId};

/// Resolves migrated series to their data point configuration
pub trait SeriesResolver: Send + Sync + 'static {
    /// Every series that should be migrated
    fn series_ids(&self) -> Vec<SeriesId>;

    /// `None` when the point no longer exists
    fn resolve(&self, series_id: SeriesId) -> Option<DataPointConfig>;
}

/// Resolver over a fixed set of point configurations
#[derive(Debug, Default)]
pub struct StaticSeriesResolver {
    points: RwLock<BTreeMap<SeriesId, DataPointConfig>>,
}

impl StaticSeriesResolver {
    pub fn new(points: impl IntoIterator<Item = DataPointConfig>) -> Self {
        Self {
            points: RwLock::new(points.into_iter().map(|p| (p.series_id(), p)).collect()),
        }
    }

    pub fn insert(&self, point: DataPointConfig) {
        self.points.write().insert(point.series_id(), point);
    }

    pub fn remove(&self, series_id: SeriesId) -> Option<DataPointConfig> {
        self.points.write().remove(&series_id)
    }
}

impl SeriesResolver for StaticSeriesResolver {
    fn series_ids(&self) -> Vec<SeriesId> {
        self.points.read().keys().copied().collect()
    }

    fn resolve(&self, series_id: SeriesId) -> Option<DataPointConfig> {
        self.points.read().get(&series_id).cloned()
    }
}
