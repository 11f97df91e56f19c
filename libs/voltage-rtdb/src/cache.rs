//! Per-point cache of recent values
//!
//! `PointValueCache` keeps the most recent samples of one point in a
//! strictly time-descending window bounded by `max_size`, in front of a
//! `PointValueStore`.
//!
//! # Concurrency
//! The window is an immutable `Vec` behind `ArcSwap`. Readers load the
//! current snapshot without locking; writers (save, grow, reload) are
//! serialised by an async mutex and publish a new snapshot.
//!
//! # Failure handling
//! Store reads on a cache miss propagate errors. Store writes are logged
//! and never roll back the in-memory insert.

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use voltage_model::{DataPointConfig, PointValueTime, SetPointSource};

use crate::error::Result;
use crate::traits::PointValueStore;

pub struct PointValueCache {
    point: DataPointConfig,
    store: Arc<dyn PointValueStore>,
    /// Time-descending, unique timestamps, `len <= max_size`
    window: ArcSwap<Vec<PointValueTime>>,
    max_size: AtomicUsize,
    /// False until the window has been merged with the store's tail
    loaded: AtomicBool,
    writer: Mutex<()>,
}

impl PointValueCache {
    /// Create a cache that loads the store's tail on first access
    pub fn new(point: DataPointConfig, store: Arc<dyn PointValueStore>, max_size: usize) -> Self {
        Self {
            point,
            store,
            window: ArcSwap::from_pointee(Vec::new()),
            max_size: AtomicUsize::new(max_size),
            loaded: AtomicBool::new(false),
            writer: Mutex::new(()),
        }
    }

    /// Create a cache pre-seeded with known latest values
    pub fn with_values(
        point: DataPointConfig,
        store: Arc<dyn PointValueStore>,
        max_size: usize,
        initial: Vec<PointValueTime>,
    ) -> Self {
        let cache = Self::new(point, store, max_size);
        cache.window.store(Arc::new(normalize(initial, max_size)));
        cache.loaded.store(true, Ordering::Release);
        cache
    }

    pub fn point(&self) -> &DataPointConfig {
        &self.point
    }

    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Load the store's tail now instead of on first access
    pub async fn load(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let _guard = self.writer.lock().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let size = self.max_size();
        let fetched = if size == 0 {
            Vec::new()
        } else {
            self.store.latest_point_values(&self.point, size).await?
        };
        // Values saved before the load are newer writes and win
        let mut merged = self.window.load().to_vec();
        merged.extend(fetched);
        let merged = normalize(merged, size);
        debug!(
            point_id = self.point.id,
            loaded = merged.len(),
            "Point value cache loaded"
        );
        self.window.store(Arc::new(merged));
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    // ========================================================================
    // Latest values
    // ========================================================================

    pub async fn latest_value(&self) -> Result<Option<PointValueTime>> {
        self.load().await?;
        if let Some(head) = self.window.load().first() {
            return Ok(Some(head.clone()));
        }
        self.store.latest_point_value(&self.point).await
    }

    /// Latest `n` values, time-descending
    ///
    /// Asking for more than `max_size` grows the window to `n`: pending
    /// async writes are flushed, the store's latest `n` are fetched and
    /// merged with the window, and `max_size` becomes `n`.
    pub async fn latest_values(&self, n: usize) -> Result<Vec<PointValueTime>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.load().await?;

        let snapshot = self.window.load_full();
        if n <= snapshot.len() {
            return Ok(snapshot[..n].to_vec());
        }
        if n <= self.max_size() {
            if snapshot.is_empty() {
                return self.store.latest_point_values(&self.point, n).await;
            }
            return Ok(snapshot.to_vec());
        }
        self.grow(n).await
    }

    async fn grow(&self, n: usize) -> Result<Vec<PointValueTime>> {
        let _guard = self.writer.lock().await;
        if n <= self.max_size() {
            // Another caller grew the window while we waited
            let snapshot = self.window.load();
            return Ok(snapshot.iter().take(n).cloned().collect());
        }

        if let Err(e) = self.store.flush_pending().await {
            warn!(point_id = self.point.id, error = %e, "Flush before cache growth failed");
        }
        let fetched = self.store.latest_point_values(&self.point, n).await?;

        let mut merged = self.window.load().to_vec();
        merged.extend(fetched);
        let merged = normalize(merged, n);

        debug!(
            point_id = self.point.id,
            from = self.max_size(),
            to = n,
            "Point value cache grown"
        );
        self.window.store(Arc::new(merged.clone()));
        self.max_size.store(n, Ordering::Release);
        self.loaded.store(true, Ordering::Release);
        Ok(merged)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a value into the window and optionally persist it
    ///
    /// Backdated values are inserted at their sorted position; a value
    /// with the same timestamp as a cached one replaces it. `logged`
    /// controls whether the value is written to the store, `async_save`
    /// whether that write is buffered.
    pub async fn save(
        &self,
        value: PointValueTime,
        source: Option<&SetPointSource>,
        async_save: bool,
        logged: bool,
    ) -> Result<()> {
        if let Err(e) = self.load().await {
            warn!(point_id = self.point.id, error = %e, "Cache load failed, saving into unloaded window");
        }

        {
            let _guard = self.writer.lock().await;
            let mut next = self.window.load().to_vec();
            insert_descending(&mut next, value.clone());
            next.truncate(self.max_size());
            self.window.store(Arc::new(next));
        }

        trace!(
            point_id = self.point.id,
            value = %value,
            source = ?source,
            logged,
            "Point value cached"
        );

        if logged {
            self.persist(value, async_save).await;
        }
        Ok(())
    }

    /// Write a value to the store without touching the window
    pub(crate) async fn persist(&self, value: PointValueTime, async_save: bool) {
        let time = value.time;
        let result = if async_save {
            self.store.save_point_value_async(&self.point, value).await
        } else {
            self.store
                .save_point_value_sync(&self.point, value)
                .await
                .map(|_| ())
        };
        if let Err(e) = result {
            warn!(
                point_id = self.point.id,
                series_id = self.point.series_id(),
                time,
                error = %e,
                "Failed to persist point value"
            );
        }
    }

    /// Copy of the current window, time-descending
    pub async fn cache_contents(&self) -> Result<Vec<PointValueTime>> {
        self.load().await?;
        Ok(self.window.load().to_vec())
    }

    /// Drop all cached values
    ///
    /// With `full`, the next access reloads from the store instead of
    /// treating the empty window as "no history".
    pub async fn invalidate(&self, full: bool) {
        let _guard = self.writer.lock().await;
        self.window.store(Arc::new(Vec::new()));
        if full {
            self.loaded.store(false, Ordering::Release);
        }
        debug!(point_id = self.point.id, full, "Point value cache invalidated");
    }

    /// Flush pending async writes, then rebuild the window from the store
    pub async fn reset_values(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.store.flush_pending().await?;
        let size = self.max_size();
        let fetched = if size == 0 {
            Vec::new()
        } else {
            self.store.latest_point_values(&self.point, size).await?
        };
        self.window.store(Arc::new(normalize(fetched, size)));
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    // ========================================================================
    // Point-in-time queries
    // ========================================================================
    //
    // The window always holds a contiguous tail of the series, so any
    // question whose answer lies at or after the oldest cached timestamp is
    // answered from memory. Interval boundary samples bypass the window, so
    // interval points merge the store's answer with the window's instead.

    fn window_is_complete(&self) -> bool {
        !self.point.logging_type.uses_interval()
    }

    /// Latest value with `time < t`
    pub async fn value_before(&self, t: i64) -> Result<Option<PointValueTime>> {
        self.load().await?;
        let snapshot = self.window.load_full();
        let idx = snapshot.partition_point(|v| v.time >= t);
        let cached = snapshot.get(idx).cloned();
        if cached.is_some() && self.window_is_complete() {
            return Ok(cached);
        }
        let stored = self.store.point_value_before(&self.point, t).await?;
        Ok(match (stored, cached) {
            (Some(s), Some(c)) if c.time >= s.time => Some(c),
            (Some(s), _) => Some(s),
            (None, c) => c,
        })
    }

    /// Value with `time == t`
    pub async fn value_at(&self, t: i64) -> Result<Option<PointValueTime>> {
        self.load().await?;
        let snapshot = self.window.load_full();
        let cached = snapshot
            .binary_search_by(|v| t.cmp(&v.time))
            .ok()
            .map(|i| snapshot[i].clone());
        let covered = matches!(snapshot.last(), Some(oldest) if t >= oldest.time);
        if cached.is_some() || (covered && self.window_is_complete()) {
            return Ok(cached);
        }
        self.store.point_value_at(&self.point, t).await
    }

    /// Earliest value with `time >= t`
    pub async fn value_after(&self, t: i64) -> Result<Option<PointValueTime>> {
        self.load().await?;
        let snapshot = self.window.load_full();
        let idx = snapshot.partition_point(|v| v.time >= t);
        let cached = idx.checked_sub(1).map(|i| snapshot[i].clone());
        let covered = matches!(snapshot.last(), Some(oldest) if oldest.time <= t);
        if covered && self.window_is_complete() {
            return Ok(cached);
        }
        let stored = self.store.point_value_after(&self.point, t).await?;
        Ok(match (stored, cached) {
            (Some(s), Some(c)) if c.time <= s.time => Some(c),
            (Some(s), _) => Some(s),
            (None, c) => c,
        })
    }

    /// Values in `[from, to)`, time-ascending
    pub async fn values_between(&self, from: i64, to: i64) -> Result<Vec<PointValueTime>> {
        if from >= to {
            return Ok(Vec::new());
        }
        self.load().await?;
        let snapshot = self.window.load_full();
        let cached: Vec<PointValueTime> = snapshot
            .iter()
            .rev()
            .filter(|v| v.time >= from && v.time < to)
            .cloned()
            .collect();

        let covered = matches!(snapshot.last(), Some(oldest) if oldest.time <= from);
        if covered && self.window_is_complete() {
            return Ok(cached);
        }

        let stored = self.store.point_values_between(&self.point, from, to).await?;
        let mut merged: BTreeMap<i64, PointValueTime> =
            stored.into_iter().map(|v| (v.time, v)).collect();
        for v in cached {
            merged.insert(v.time, v);
        }
        Ok(merged.into_values().collect())
    }

    /// Values with `time >= since`, time-ascending
    pub async fn values_since(&self, since: i64) -> Result<Vec<PointValueTime>> {
        self.values_between(since, i64::MAX).await
    }
}

/// Insert keeping strict time-descending order; equal timestamps replace
fn insert_descending(window: &mut Vec<PointValueTime>, value: PointValueTime) {
    match window.binary_search_by(|v| value.time.cmp(&v.time)) {
        Ok(i) => window[i] = value,
        Err(i) => window.insert(i, value),
    }
}

/// Sort time-descending, keep the first occurrence of each timestamp and
/// truncate to `size`
fn normalize(mut values: Vec<PointValueTime>, size: usize) -> Vec<PointValueTime> {
    values.sort_by(|a, b| b.time.cmp(&a.time));
    values.dedup_by_key(|v| v.time);
    values.truncate(size);
    values
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::MemoryPointValueStore;
    use voltage_model::DataType;

    fn times(values: &[PointValueTime]) -> Vec<i64> {
        values.iter().map(|v| v.time).collect()
    }

    fn setup(size: usize) -> (Arc<MemoryPointValueStore>, PointValueCache) {
        let store = Arc::new(MemoryPointValueStore::new());
        let point = DataPointConfig::new(1, DataType::Numeric);
        let cache = PointValueCache::new(point, store.clone(), size);
        (store, cache)
    }

    #[test]
    fn test_insert_descending() {
        let mut window = Vec::new();
        for t in [10, 30, 20, 30, 5] {
            insert_descending(&mut window, PointValueTime::numeric(t as f64, t));
        }
        assert_eq!(times(&window), vec![30, 20, 10, 5]);
    }

    #[test]
    fn test_normalize_keeps_first_duplicate() {
        let values = vec![
            PointValueTime::numeric(1.0, 10),
            PointValueTime::numeric(2.0, 10),
            PointValueTime::numeric(3.0, 20),
        ];
        let out = normalize(values, 5);
        assert_eq!(times(&out), vec![20, 10]);
        assert_eq!(out[1].value.as_f64(), Some(1.0));
    }

    #[tokio::test]
    async fn test_save_trims_to_max_size() {
        let (_store, cache) = setup(3);
        for t in 0..10 {
            cache
                .save(PointValueTime::numeric(t as f64, t), None, false, true)
                .await
                .unwrap();
            assert!(cache.cache_contents().await.unwrap().len() <= 3);
        }
        assert_eq!(times(&cache.cache_contents().await.unwrap()), vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn test_backdated_value_sorted_insert() {
        let (store, cache) = setup(5);
        for t in [100, 300] {
            cache
                .save(PointValueTime::numeric(0.0, t), None, false, true)
                .await
                .unwrap();
        }
        cache
            .save(PointValueTime::numeric(0.0, 200), None, false, true)
            .await
            .unwrap();

        assert_eq!(
            times(&cache.cache_contents().await.unwrap()),
            vec![300, 200, 100]
        );
        assert_eq!(store.value_count(cache.point()), 3);
    }

    #[tokio::test]
    async fn test_unlogged_value_not_persisted() {
        let (store, cache) = setup(2);
        cache
            .save(PointValueTime::numeric(1.0, 1), None, false, false)
            .await
            .unwrap();
        assert_eq!(store.value_count(cache.point()), 0);
        assert_eq!(cache.latest_value().await.unwrap().unwrap().time, 1);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_insert() {
        let (store, cache) = setup(2);
        cache.load().await.unwrap();
        store.fail_writes(true);
        cache
            .save(PointValueTime::numeric(1.0, 1), None, false, true)
            .await
            .unwrap();
        assert_eq!(cache.latest_value().await.unwrap().unwrap().time, 1);
    }

    #[tokio::test]
    async fn test_read_failure_propagates_on_miss() {
        let (store, cache) = setup(0);
        store.fail_reads(true);
        assert!(cache.latest_value().await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_full_reloads() {
        let (_store, cache) = setup(3);
        for t in 1..=3 {
            cache
                .save(PointValueTime::numeric(0.0, t), None, false, true)
                .await
                .unwrap();
        }

        cache.invalidate(true).await;
        assert!(!cache.is_loaded());
        assert_eq!(times(&cache.cache_contents().await.unwrap()), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_reset_values_flushes_async_writes() {
        let (store, cache) = setup(3);
        cache
            .save(PointValueTime::numeric(1.0, 10), None, true, true)
            .await
            .unwrap();
        assert_eq!(store.value_count(cache.point()), 0);

        cache.reset_values().await.unwrap();
        assert_eq!(store.value_count(cache.point()), 1);
        assert_eq!(times(&cache.cache_contents().await.unwrap()), vec![10]);
    }

    #[tokio::test]
    async fn test_growth_keeps_unflushed_values() {
        let (store, cache) = setup(1);
        let point = cache.point().clone();
        let seed: Vec<_> = (0..5).map(|t| PointValueTime::numeric(0.0, t)).collect();
        store.save_point_values(&point, &seed).await.unwrap();

        cache
            .save(PointValueTime::numeric(1.0, 100), None, true, true)
            .await
            .unwrap();

        let latest = cache.latest_values(4).await.unwrap();
        assert_eq!(times(&latest), vec![100, 4, 3, 2]);
        assert_eq!(cache.max_size(), 4);
    }

    #[tokio::test]
    async fn test_point_queries_fall_back_to_store() {
        let (store, cache) = setup(2);
        let point = cache.point().clone();
        let seed: Vec<_> = (0..5)
            .map(|i| PointValueTime::numeric(i as f64, i * 1000))
            .collect();
        store.save_point_values(&point, &seed).await.unwrap();
        cache.load().await.unwrap();
        assert_eq!(times(&cache.cache_contents().await.unwrap()), vec![4000, 3000]);

        // From the window
        assert_eq!(cache.value_before(4000).await.unwrap().unwrap().time, 3000);
        assert_eq!(cache.value_at(3000).await.unwrap().unwrap().time, 3000);
        assert!(cache.value_at(3500).await.unwrap().is_none());
        assert_eq!(cache.value_after(3500).await.unwrap().unwrap().time, 4000);

        // From the store
        assert_eq!(cache.value_before(3000).await.unwrap().unwrap().time, 2000);
        assert_eq!(cache.value_at(1000).await.unwrap().unwrap().time, 1000);
        assert_eq!(cache.value_after(500).await.unwrap().unwrap().time, 1000);
        assert!(cache.value_before(0).await.unwrap().is_none());
    }
}
