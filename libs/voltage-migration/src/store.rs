//! Routing point-value store used while a migration is in progress
//!
//! Every operation is sent to the primary store when the series has no
//! migration record or is `MIGRATED`, otherwise to the secondary store.
//! Writes hold the series' copy lock shared so none can land between the
//! final-window copy and the switch to the primary store.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use voltage_model::{DataPointConfig, PointValueTime, TimeOrder};
use voltage_rtdb::{PointValueStore, Result};

use crate::registry::{SeriesRegistry, StoreOperation};

pub struct MigrationPointValueStore {
    primary: Arc<dyn PointValueStore>,
    secondary: Arc<dyn PointValueStore>,
    registry: Arc<SeriesRegistry>,
}

impl MigrationPointValueStore {
    pub fn new(
        primary: Arc<dyn PointValueStore>,
        secondary: Arc<dyn PointValueStore>,
        registry: Arc<SeriesRegistry>,
    ) -> Self {
        Self {
            primary,
            secondary,
            registry,
        }
    }

    fn route(&self, point: &DataPointConfig, op: StoreOperation) -> Result<&dyn PointValueStore> {
        let store = if self.registry.handle_with_primary(point.series_id(), op)? {
            self.primary.as_ref()
        } else {
            self.secondary.as_ref()
        };
        Ok(store)
    }

    /// Read routing never fails; only deletes are rejected
    fn read_route(&self, point: &DataPointConfig) -> &dyn PointValueStore {
        match self.registry.status(point.series_id()) {
            Some(status) if status != crate::MigrationStatus::Migrated => self.secondary.as_ref(),
            _ => self.primary.as_ref(),
        }
    }
}

#[async_trait]
impl PointValueStore for MigrationPointValueStore {
    async fn save_point_value_sync(
        &self,
        point: &DataPointConfig,
        value: PointValueTime,
    ) -> Result<PointValueTime> {
        let series = self.registry.get(point.series_id());
        let _shared = match &series {
            Some(s) => Some(s.copy_lock.read().await),
            None => None,
        };
        self.route(point, StoreOperation::Write)?
            .save_point_value_sync(point, value)
            .await
    }

    async fn save_point_value_async(
        &self,
        point: &DataPointConfig,
        value: PointValueTime,
    ) -> Result<()> {
        let series = self.registry.get(point.series_id());
        let _shared = match &series {
            Some(s) => Some(s.copy_lock.read().await),
            None => None,
        };
        self.route(point, StoreOperation::Write)?
            .save_point_value_async(point, value)
            .await
    }

    async fn flush_pending(&self) -> Result<usize> {
        let secondary = self.secondary.flush_pending().await?;
        let primary = self.primary.flush_pending().await?;
        Ok(primary + secondary)
    }

    async fn save_point_values(
        &self,
        point: &DataPointConfig,
        values: &[PointValueTime],
    ) -> Result<usize> {
        let series = self.registry.get(point.series_id());
        let _shared = match &series {
            Some(s) => Some(s.copy_lock.read().await),
            None => None,
        };
        self.route(point, StoreOperation::Write)?
            .save_point_values(point, values)
            .await
    }

    async fn delete_point_values(&self, point: &DataPointConfig) -> Result<usize> {
        self.route(point, StoreOperation::Delete)?
            .delete_point_values(point)
            .await
    }

    async fn latest_point_value(&self, point: &DataPointConfig) -> Result<Option<PointValueTime>> {
        self.read_route(point).latest_point_value(point).await
    }

    async fn latest_point_values(
        &self,
        point: &DataPointConfig,
        limit: usize,
    ) -> Result<Vec<PointValueTime>> {
        self.read_route(point).latest_point_values(point, limit).await
    }

    async fn point_value_before(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>> {
        self.read_route(point).point_value_before(point, time).await
    }

    async fn point_value_at(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>> {
        self.read_route(point).point_value_at(point, time).await
    }

    async fn point_value_after(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>> {
        self.read_route(point).point_value_after(point, time).await
    }

    async fn point_values_between(
        &self,
        point: &DataPointConfig,
        from: i64,
        to: i64,
    ) -> Result<Vec<PointValueTime>> {
        self.read_route(point)
            .point_values_between(point, from, to)
            .await
    }

    fn stream_point_values<'a>(
        &'a self,
        point: &'a DataPointConfig,
        from: i64,
        to: i64,
        order: TimeOrder,
        chunk_size: usize,
    ) -> BoxStream<'a, Result<Vec<PointValueTime>>> {
        self.read_route(point)
            .stream_point_values(point, from, to, order, chunk_size)
    }

    async fn inception_date(&self, point: &DataPointConfig) -> Result<Option<i64>> {
        self.read_route(point).inception_date(point).await
    }
}
