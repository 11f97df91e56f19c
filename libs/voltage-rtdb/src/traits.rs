//! Trait definitions for the time-series store abstraction

use async_trait::async_trait;
use futures::stream::BoxStream;
use voltage_model::{DataPointConfig, PointValueTime, TimeOrder};

use crate::error::Result;

/// Durable, time-ordered point-value storage
///
/// All methods key on `point.series_id()`. Timestamps are milliseconds
/// since the Unix epoch. Query boundaries:
/// - `point_value_before(t)`: latest sample with `time < t`
/// - `point_value_at(t)`: sample with `time == t`
/// - `point_value_after(t)`: earliest sample with `time >= t`
/// - ranges are half-open `[from, to)`
///
/// Implementations:
/// - `MemoryPointValueStore`: in-memory backend for testing and embedding
/// - `MigrationPointValueStore` (voltage-migration): routes between two stores
#[async_trait]
pub trait PointValueStore: Send + Sync + 'static {
    // ========== Writes ==========

    /// Persist one value, returning once it is durable
    async fn save_point_value_sync(
        &self,
        point: &DataPointConfig,
        value: PointValueTime,
    ) -> Result<PointValueTime>;

    /// Queue one value for a later batched write
    async fn save_point_value_async(
        &self,
        point: &DataPointConfig,
        value: PointValueTime,
    ) -> Result<()>;

    /// Drain queued async writes, returning how many values were written
    async fn flush_pending(&self) -> Result<usize> {
        Ok(0)
    }

    /// Bulk write, returning the number of values written
    async fn save_point_values(
        &self,
        point: &DataPointConfig,
        values: &[PointValueTime],
    ) -> Result<usize>;

    /// Delete every value of the series
    async fn delete_point_values(&self, point: &DataPointConfig) -> Result<usize>;

    // ========== Reads ==========

    async fn latest_point_value(&self, point: &DataPointConfig) -> Result<Option<PointValueTime>>;

    /// Latest `limit` values, time-descending
    async fn latest_point_values(
        &self,
        point: &DataPointConfig,
        limit: usize,
    ) -> Result<Vec<PointValueTime>>;

    async fn point_value_before(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>>;

    async fn point_value_at(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>>;

    async fn point_value_after(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>>;

    /// Values in `[from, to)`, time-ascending
    async fn point_values_between(
        &self,
        point: &DataPointConfig,
        from: i64,
        to: i64,
    ) -> Result<Vec<PointValueTime>>;

    /// Stream values in `[from, to)` in chunks of at most `chunk_size`
    ///
    /// The stream is lazy and finite. It is not restartable; call again to
    /// read the range a second time.
    fn stream_point_values<'a>(
        &'a self,
        point: &'a DataPointConfig,
        from: i64,
        to: i64,
        order: TimeOrder,
        chunk_size: usize,
    ) -> BoxStream<'a, Result<Vec<PointValueTime>>>;

    /// Timestamp of the earliest stored sample
    async fn inception_date(&self, point: &DataPointConfig) -> Result<Option<i64>>;
}
