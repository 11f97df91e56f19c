//! In-memory point-value store
//!
//! Uses DashMap keyed by series with a `BTreeMap` per series for ordered
//! range access. Suitable for testing and embedded scenarios. Async saves
//! go through an embedded `WriteBuffer` and only become visible to reads
//! once flushed.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use voltage_model::{DataPointConfig, DataValue, PointValueTime, SeriesId, TimeOrder};

use crate::error::{Result, RtdbError};
use crate::traits::PointValueStore;
use crate::write_buffer::{WriteBuffer, WriteBufferConfig};

type Series = RwLock<BTreeMap<i64, DataValue>>;

/// In-memory store with concurrent access support
pub struct MemoryPointValueStore {
    series: DashMap<SeriesId, Series>,
    buffer: WriteBuffer,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl MemoryPointValueStore {
    pub fn new() -> Self {
        Self::with_config(WriteBufferConfig::default())
    }

    pub fn with_config(config: WriteBufferConfig) -> Self {
        Self {
            series: DashMap::new(),
            buffer: WriteBuffer::new(config),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    /// Make every subsequent write fail (testing)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail (testing)
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of durable values for a point
    pub fn value_count(&self, point: &DataPointConfig) -> usize {
        self.series
            .get(&point.series_id())
            .map(|s| s.read().len())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.series.clear();
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            series_count: self.series.len(),
            value_count: self.series.iter().map(|s| s.read().len()).sum(),
            buffered_values: self.buffer.pending_values(),
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }

    fn check_write(&self, series_id: SeriesId) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RtdbError::store(series_id, "write rejected"));
        }
        Ok(())
    }

    fn check_read(&self, series_id: SeriesId) -> Result<()> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RtdbError::store(series_id, "read rejected"));
        }
        Ok(())
    }

    fn insert(&self, series_id: SeriesId, values: &[PointValueTime]) {
        let series = self.series.entry(series_id).or_default();
        let mut map = series.write();
        for v in values {
            map.insert(v.time, v.value.clone());
        }
        self.writes
            .fetch_add(values.len() as u64, Ordering::Relaxed);
    }

    fn read<R>(&self, series_id: SeriesId, f: impl FnOnce(&BTreeMap<i64, DataValue>) -> R) -> Option<R> {
        self.series.get(&series_id).map(|s| f(&s.read()))
    }

    fn read_chunk(
        &self,
        series_id: SeriesId,
        lo: i64,
        hi: i64,
        order: TimeOrder,
        chunk_size: usize,
    ) -> Vec<PointValueTime> {
        if lo >= hi {
            return Vec::new();
        }
        self.read(series_id, |map| {
            let range = map.range(lo..hi);
            let pvt = |(t, v): (&i64, &DataValue)| PointValueTime::new(v.clone(), *t);
            match order {
                TimeOrder::Ascending => range.take(chunk_size).map(pvt).collect(),
                TimeOrder::Descending => range.rev().take(chunk_size).map(pvt).collect(),
            }
        })
        .unwrap_or_default()
    }
}

impl Default for MemoryPointValueStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory store usage
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub series_count: usize,
    pub value_count: usize,
    pub buffered_values: usize,
    pub writes: u64,
    pub reads: u64,
}

#[async_trait]
impl PointValueStore for MemoryPointValueStore {
    async fn save_point_value_sync(
        &self,
        point: &DataPointConfig,
        value: PointValueTime,
    ) -> Result<PointValueTime> {
        let series_id = point.series_id();
        self.check_write(series_id)?;
        self.insert(series_id, std::slice::from_ref(&value));
        Ok(value)
    }

    async fn save_point_value_async(
        &self,
        point: &DataPointConfig,
        value: PointValueTime,
    ) -> Result<()> {
        self.buffer.buffer_value(point, value);
        Ok(())
    }

    async fn flush_pending(&self) -> Result<usize> {
        self.buffer.flush(self).await
    }

    async fn save_point_values(
        &self,
        point: &DataPointConfig,
        values: &[PointValueTime],
    ) -> Result<usize> {
        let series_id = point.series_id();
        self.check_write(series_id)?;
        self.insert(series_id, values);
        Ok(values.len())
    }

    async fn delete_point_values(&self, point: &DataPointConfig) -> Result<usize> {
        let series_id = point.series_id();
        self.check_write(series_id)?;
        Ok(self
            .series
            .remove(&series_id)
            .map(|(_, s)| s.into_inner().len())
            .unwrap_or(0))
    }

    async fn latest_point_value(&self, point: &DataPointConfig) -> Result<Option<PointValueTime>> {
        let series_id = point.series_id();
        self.check_read(series_id)?;
        Ok(self
            .read(series_id, |map| {
                map.iter()
                    .next_back()
                    .map(|(t, v)| PointValueTime::new(v.clone(), *t))
            })
            .flatten())
    }

    async fn latest_point_values(
        &self,
        point: &DataPointConfig,
        limit: usize,
    ) -> Result<Vec<PointValueTime>> {
        let series_id = point.series_id();
        self.check_read(series_id)?;
        Ok(self.read_chunk(series_id, i64::MIN, i64::MAX, TimeOrder::Descending, limit))
    }

    async fn point_value_before(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>> {
        let series_id = point.series_id();
        self.check_read(series_id)?;
        Ok(self
            .read_chunk(series_id, i64::MIN, time, TimeOrder::Descending, 1)
            .pop())
    }

    async fn point_value_at(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>> {
        let series_id = point.series_id();
        self.check_read(series_id)?;
        Ok(self
            .read(series_id, |map| {
                map.get(&time).map(|v| PointValueTime::new(v.clone(), time))
            })
            .flatten())
    }

    async fn point_value_after(
        &self,
        point: &DataPointConfig,
        time: i64,
    ) -> Result<Option<PointValueTime>> {
        let series_id = point.series_id();
        self.check_read(series_id)?;
        Ok(self
            .read_chunk(series_id, time, i64::MAX, TimeOrder::Ascending, 1)
            .pop())
    }

    async fn point_values_between(
        &self,
        point: &DataPointConfig,
        from: i64,
        to: i64,
    ) -> Result<Vec<PointValueTime>> {
        let series_id = point.series_id();
        self.check_read(series_id)?;
        Ok(self.read_chunk(series_id, from, to, TimeOrder::Ascending, usize::MAX))
    }

    fn stream_point_values<'a>(
        &'a self,
        point: &'a DataPointConfig,
        from: i64,
        to: i64,
        order: TimeOrder,
        chunk_size: usize,
    ) -> BoxStream<'a, Result<Vec<PointValueTime>>> {
        let series_id = point.series_id();
        let chunk_size = chunk_size.max(1);
        let start = match order {
            TimeOrder::Ascending => from,
            TimeOrder::Descending => to,
        };

        // The cursor is the next inclusive lower bound (ascending) or the
        // next exclusive upper bound (descending).
        stream::unfold(Some(start), move |cursor| async move {
            let cursor = cursor?;
            if let Err(e) = self.check_read(series_id) {
                return Some((Err(e), None));
            }
            let chunk = match order {
                TimeOrder::Ascending => self.read_chunk(series_id, cursor, to, order, chunk_size),
                TimeOrder::Descending => {
                    self.read_chunk(series_id, from, cursor, order, chunk_size)
                },
            };
            let last = chunk.last()?.time;
            let next = if chunk.len() < chunk_size {
                None
            } else {
                match order {
                    TimeOrder::Ascending => last.checked_add(1),
                    TimeOrder::Descending => Some(last),
                }
            };
            Some((Ok(chunk), next))
        })
        .boxed()
    }

    async fn inception_date(&self, point: &DataPointConfig) -> Result<Option<i64>> {
        let series_id = point.series_id();
        self.check_read(series_id)?;
        Ok(self
            .read(series_id, |map| map.keys().next().copied())
            .flatten())
    }
}
