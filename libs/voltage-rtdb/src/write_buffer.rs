//! Write buffer for batching async point-value saves
//!
//! `save_point_value_async` lands here instead of hitting the store. The
//! buffer groups values per series and a background loop flushes them in
//! batches through `PointValueStore::save_point_values`.
//!
//! # Usage
//! ```ignore
//! let store = Arc::new(MemoryPointValueStore::new());
//! let shutdown = Arc::new(Notify::new());
//! tokio::spawn({
//!     let store = store.clone();
//!     let shutdown = shutdown.clone();
//!     async move { store.buffer().flush_loop_with_shutdown(&*store, shutdown).await }
//! });
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use voltage_model::{DataPointConfig, PointValueTime, SeriesId};

use crate::error::Result;
use crate::traits::PointValueStore;

/// Write buffer configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBufferConfig {
    /// Flush interval in milliseconds (default: 20ms)
    pub flush_interval_ms: u64,
    /// Values per series before forcing a flush (default: 1000)
    pub max_values_per_series: usize,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 20,
            max_values_per_series: 1000,
        }
    }
}

impl WriteBufferConfig {
    pub fn low_latency() -> Self {
        Self {
            flush_interval_ms: 10,
            max_values_per_series: 500,
        }
    }

    pub fn high_throughput() -> Self {
        Self {
            flush_interval_ms: 50,
            max_values_per_series: 2000,
        }
    }
}

/// Statistics for monitoring write buffer performance
#[derive(Debug, Default)]
pub struct WriteBufferStats {
    pub buffered_values: AtomicU64,
    pub flush_count: AtomicU64,
    pub values_flushed: AtomicU64,
    /// Flushes triggered by the per-series threshold
    pub forced_flushes: AtomicU64,
    pub flush_errors: AtomicU64,
}

impl WriteBufferStats {
    pub fn snapshot(&self) -> WriteBufferStatsSnapshot {
        WriteBufferStatsSnapshot {
            buffered_values: self.buffered_values.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            values_flushed: self.values_flushed.load(Ordering::Relaxed),
            forced_flushes: self.forced_flushes.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBufferStatsSnapshot {
    pub buffered_values: u64,
    pub flush_count: u64,
    pub values_flushed: u64,
    pub forced_flushes: u64,
    pub flush_errors: u64,
}

struct PendingSeries {
    point: DataPointConfig,
    values: Vec<PointValueTime>,
}

/// Per-series buffer of values awaiting a batched write
pub struct WriteBuffer {
    pending: DashMap<SeriesId, PendingSeries>,
    flush_notify: Arc<Notify>,
    /// Held for a whole flush so `flush` returning means queued values landed
    flush_lock: Mutex<()>,
    config: WriteBufferConfig,
    stats: WriteBufferStats,
}

impl WriteBuffer {
    pub fn new(config: WriteBufferConfig) -> Self {
        Self {
            pending: DashMap::new(),
            flush_notify: Arc::new(Notify::new()),
            flush_lock: Mutex::new(()),
            config,
            stats: WriteBufferStats::default(),
        }
    }

    pub fn config(&self) -> &WriteBufferConfig {
        &self.config
    }

    pub fn stats(&self) -> &WriteBufferStats {
        &self.stats
    }

    /// Buffer one value (returns immediately)
    pub fn buffer_value(&self, point: &DataPointConfig, value: PointValueTime) {
        let series_id = point.series_id();
        // get_mut first to avoid cloning the point config on the hot path
        let len = if let Some(mut entry) = self.pending.get_mut(&series_id) {
            entry.values.push(value);
            entry.values.len()
        } else {
            let mut entry = self
                .pending
                .entry(series_id)
                .or_insert_with(|| PendingSeries {
                    point: point.clone(),
                    values: Vec::new(),
                });
            entry.values.push(value);
            entry.values.len()
        };

        self.stats.buffered_values.fetch_add(1, Ordering::Relaxed);

        if len >= self.config.max_values_per_series {
            self.stats.forced_flushes.fetch_add(1, Ordering::Relaxed);
            self.flush_notify.notify_one();
        }
    }

    pub fn pending_series(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_values(&self) -> usize {
        self.pending.iter().map(|e| e.value().values.len()).sum()
    }

    /// Pending values of one series, in arrival order
    pub fn pending_for(&self, series_id: SeriesId) -> Vec<PointValueTime> {
        self.pending
            .get(&series_id)
            .map(|e| e.values.clone())
            .unwrap_or_default()
    }

    fn drain_pending(&self) -> Vec<PendingSeries> {
        let keys: Vec<SeriesId> = self.pending.iter().map(|e| *e.key()).collect();
        keys.into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|(_, v)| v))
            .filter(|p| !p.values.is_empty())
            .collect()
    }

    /// Put a failed batch back in front of anything buffered since
    fn requeue(&self, batch: PendingSeries) {
        let series_id = batch.point.series_id();
        match self.pending.entry(series_id) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                let newer = std::mem::take(&mut e.get_mut().values);
                let mut values = batch.values;
                values.extend(newer);
                e.get_mut().values = values;
            },
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(batch);
            },
        }
    }

    /// Background flush loop with shutdown support
    ///
    /// Performs a final flush before returning.
    pub async fn flush_loop_with_shutdown<S>(&self, store: &S, shutdown: Arc<Notify>)
    where
        S: PointValueStore + ?Sized,
    {
        let interval = Duration::from_millis(self.config.flush_interval_ms.max(1));

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    tracing::debug!("WriteBuffer received shutdown signal");
                    if let Err(e) = self.flush(store).await {
                        tracing::warn!(error = %e, "WriteBuffer final flush failed");
                    }
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
                _ = self.flush_notify.notified() => {}
            }

            if let Err(e) = self.flush(store).await {
                tracing::warn!(error = %e, "WriteBuffer flush failed");
            }
        }

        tracing::debug!("WriteBuffer flush loop stopped");
    }

    /// Flush all pending values, returning the number written
    ///
    /// A series whose write fails is re-buffered and retried on the next
    /// flush; the first error is returned after every series was attempted.
    pub async fn flush<S>(&self, store: &S) -> Result<usize>
    where
        S: PointValueStore + ?Sized,
    {
        let _guard = self.flush_lock.lock().await;
        let batches = self.drain_pending();
        if batches.is_empty() {
            return Ok(0);
        }

        let mut written = 0usize;
        let mut first_error = None;
        for batch in batches {
            match store.save_point_values(&batch.point, &batch.values).await {
                Ok(n) => written += n,
                Err(e) => {
                    self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        series_id = batch.point.series_id(),
                        values = batch.values.len(),
                        error = %e,
                        "WriteBuffer series flush failed, re-buffered"
                    );
                    self.requeue(batch);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                },
            }
        }

        self.stats.flush_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .values_flushed
            .fetch_add(written as u64, Ordering::Relaxed);
        tracing::trace!(values = written, "WriteBuffer flushed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}
