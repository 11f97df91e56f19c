//! Point runtime
//!
//! A `PointRuntime` owns the `PointValueCache` of one enabled data point and
//! decides, per incoming value, whether it is persisted according to the
//! point's logging policy. Interval-based policies run a background task
//! that writes one value per interval boundary.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use voltage_model::{
    DataPointConfig, DataType, DataValue, IntervalLoggingType, LoggingType, PointId,
    PointValueTime, SetPointSource,
};

use crate::cache::PointValueCache;
use crate::error::Result;
use crate::time::TimeProvider;
use crate::traits::PointValueStore;

/// Interval logging state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalState {
    NoPending,
    /// Next value is written at `boundary`
    Open { boundary: i64 },
}

/// Aggregates of the numeric values seen in the open interval
#[derive(Debug, Default, Clone)]
struct IntervalStats {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: u64,
}

impl IntervalStats {
    /// Start an interval with the value in effect at its beginning
    fn seeded(current: Option<&PointValueTime>) -> Self {
        let mut stats = Self::default();
        if let Some(v) = current.and_then(|c| c.value.as_f64()) {
            stats.add(v);
        }
        stats
    }

    fn add(&mut self, v: f64) {
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
        self.sum += v;
        self.count += 1;
    }
}

struct LoggingState {
    /// Latest non-backdated value
    current: Option<PointValueTime>,
    last_logged: Option<PointValueTime>,
    interval: IntervalState,
    stats: IntervalStats,
}

pub struct PointRuntime {
    point: DataPointConfig,
    cache: PointValueCache,
    time: Arc<dyn TimeProvider>,
    state: Mutex<LoggingState>,
    interval_task: Mutex<Option<JoinHandle<()>>>,
    stop: Notify,
    reschedule: Notify,
}

impl std::fmt::Debug for PointRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointRuntime").field("point", &self.point).finish_non_exhaustive()
    }
}

impl PointRuntime {
    /// Create a runtime and pre-seed its cache from the store
    pub async fn initialize(
        point: DataPointConfig,
        store: Arc<dyn PointValueStore>,
        time: Arc<dyn TimeProvider>,
        default_cache_size: usize,
    ) -> Result<Arc<Self>> {
        point.validate()?;
        let cache = PointValueCache::new(point.clone(), store, point.cache_size(default_cache_size));
        cache.load().await?;
        let current = cache.latest_value().await?;

        let runtime = Self {
            cache,
            time,
            state: Mutex::new(LoggingState {
                current: current.clone(),
                last_logged: current,
                interval: IntervalState::NoPending,
                stats: IntervalStats::default(),
            }),
            interval_task: Mutex::new(None),
            stop: Notify::new(),
            reschedule: Notify::new(),
            point,
        };

        if runtime.point.logging_type.uses_interval() {
            runtime.initialize_interval_logging(runtime.time.now_millis());
        }

        debug!(
            point_id = runtime.point.id,
            logging = ?runtime.point.logging_type,
            cache_size = runtime.cache.max_size(),
            "Point runtime initialized"
        );
        Ok(Arc::new(runtime))
    }

    pub fn id(&self) -> PointId {
        self.point.id
    }

    pub fn point(&self) -> &DataPointConfig {
        &self.point
    }

    pub fn cache(&self) -> &PointValueCache {
        &self.cache
    }

    /// Latest non-backdated value seen by this runtime
    pub fn current_value(&self) -> Option<PointValueTime> {
        self.state.lock().current.clone()
    }

    pub fn interval_state(&self) -> IntervalState {
        self.state.lock().interval
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Accept a value from a data source
    pub async fn update_point_value(&self, value: PointValueTime, async_save: bool) -> Result<()> {
        self.save_point_value(value, None, async_save).await
    }

    /// Accept a value set by a user, script or event handler
    pub async fn set_point_value(&self, value: PointValueTime, source: &SetPointSource) -> Result<()> {
        self.save_point_value(value, Some(source), true).await
    }

    async fn save_point_value(
        &self,
        value: PointValueTime,
        source: Option<&SetPointSource>,
        async_save: bool,
    ) -> Result<()> {
        value.value.ensure_type(self.point.data_type)?;

        let (logged, rescheduled) = self.decide_logging(&value);
        self.cache.save(value, source, async_save, logged).await?;
        if rescheduled {
            self.reschedule.notify_one();
        }
        Ok(())
    }

    /// Returns (persist the value, interval boundary moved)
    fn decide_logging(&self, value: &PointValueTime) -> (bool, bool) {
        let logging_type = self.point.logging_type;
        let mut state = self.state.lock();

        let backdated = state
            .current
            .as_ref()
            .is_some_and(|c| value.time < c.time);
        if backdated {
            // History is corrected but current and last-logged state stay
            return (logging_type != LoggingType::None, false);
        }

        let changed = state
            .last_logged
            .as_ref()
            .map_or(true, |l| value.value.differs_from(&l.value, self.point.tolerance));
        let logged = match logging_type {
            LoggingType::OnChange | LoggingType::OnChangeInterval => changed,
            LoggingType::All => true,
            LoggingType::None | LoggingType::Interval => false,
            LoggingType::OnTsChange => state
                .current
                .as_ref()
                .map_or(true, |c| c.time != value.time),
        };

        let mut rescheduled = false;
        if logging_type.uses_interval() {
            if let Some(v) = value.value.as_f64() {
                state.stats.add(v);
            }
            if logged && logging_type == LoggingType::OnChangeInterval {
                state.interval = IntervalState::Open {
                    boundary: value.time + self.period(),
                };
                state.stats = IntervalStats::seeded(Some(value));
                rescheduled = true;
            }
        }

        if logged {
            state.last_logged = Some(value.clone());
        }
        state.current = Some(value.clone());
        (logged, rescheduled)
    }

    // ========================================================================
    // Interval logging
    // ========================================================================

    fn period(&self) -> i64 {
        self.point.interval_logging_period_ms as i64
    }

    /// Open the first interval relative to `now`
    ///
    /// The first boundary is `now + period`, or the next multiple of the
    /// period when the point quantises its intervals.
    pub fn initialize_interval_logging(&self, now: i64) {
        let period = self.period();
        if period <= 0 {
            return;
        }
        let boundary = if self.point.quantize_intervals {
            (now.div_euclid(period) + 1) * period
        } else {
            now + period
        };
        let mut state = self.state.lock();
        state.interval = IntervalState::Open { boundary };
        state.stats = IntervalStats::seeded(state.current.as_ref());
    }

    pub fn next_boundary(&self) -> Option<i64> {
        match self.state.lock().interval {
            IntervalState::Open { boundary } => Some(boundary),
            IntervalState::NoPending => None,
        }
    }

    /// Write one value for every boundary `<= now`, returning how many
    /// boundaries were written
    pub async fn poll_interval(&self, now: i64) -> usize {
        let period = self.period();
        let due = {
            let mut state = self.state.lock();
            let mut due = Vec::new();
            while let IntervalState::Open { boundary } = state.interval {
                if boundary > now || period <= 0 {
                    break;
                }
                if let Some(v) = self.interval_value(&state) {
                    due.push(PointValueTime::new(v, boundary));
                }
                state.interval = IntervalState::Open {
                    boundary: boundary + period,
                };
                state.stats = IntervalStats::seeded(state.current.as_ref());
            }
            due
        };

        let count = due.len();
        for value in due {
            self.cache.persist(value, true).await;
        }
        count
    }

    fn interval_value(&self, state: &LoggingState) -> Option<DataValue> {
        let current = state.current.as_ref()?;
        if self.point.data_type != DataType::Numeric {
            return Some(current.value.clone());
        }
        let stats = &state.stats;
        let aggregate = match self.point.interval_logging_type {
            IntervalLoggingType::Instant => None,
            IntervalLoggingType::Maximum => stats.max,
            IntervalLoggingType::Minimum => stats.min,
            IntervalLoggingType::Average => {
                (stats.count > 0).then(|| stats.sum / stats.count as f64)
            },
        };
        Some(aggregate.map_or_else(|| current.value.clone(), DataValue::Numeric))
    }

    /// Spawn the interval timer task
    pub fn start(self: &Arc<Self>) {
        if !self.point.logging_type.uses_interval() {
            return;
        }
        let runtime = Arc::clone(self);
        let handle = tokio::spawn(async move { runtime.interval_loop().await });
        if let Some(old) = self.interval_task.lock().replace(handle) {
            old.abort();
        }
    }

    async fn interval_loop(&self) {
        while let Some(boundary) = self.next_boundary() {
            let delay = (boundary - self.time.now_millis()).max(0) as u64;
            tokio::select! {
                biased;

                _ = self.stop.notified() => break,
                _ = self.reschedule.notified() => continue,
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {
                    self.poll_interval(self.time.now_millis()).await;
                }
            }
        }
        debug!(point_id = self.point.id, "Interval logging stopped");
    }

    /// Stop the interval task and wait for it to exit
    pub async fn terminate(&self) {
        self.stop.notify_one();
        let handle = self.interval_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(point_id = self.point.id, error = %e, "Interval task ended abnormally");
            }
        }
        debug!(point_id = self.point.id, "Point runtime terminated");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn latest_point_value(&self) -> Result<Option<PointValueTime>> {
        self.cache.latest_value().await
    }

    /// Latest `limit` values, time-descending
    pub async fn latest_point_values(&self, limit: usize) -> Result<Vec<PointValueTime>> {
        self.cache.latest_values(limit).await
    }

    pub async fn point_value_before(&self, time: i64) -> Result<Option<PointValueTime>> {
        self.cache.value_before(time).await
    }

    pub async fn point_value_at(&self, time: i64) -> Result<Option<PointValueTime>> {
        self.cache.value_at(time).await
    }

    pub async fn point_value_after(&self, time: i64) -> Result<Option<PointValueTime>> {
        self.cache.value_after(time).await
    }

    /// Values with `time >= since`, time-ascending
    pub async fn point_values(&self, since: i64) -> Result<Vec<PointValueTime>> {
        self.cache.values_since(since).await
    }

    /// Values in `[from, to)`, time-ascending
    pub async fn point_values_between(&self, from: i64, to: i64) -> Result<Vec<PointValueTime>> {
        self.cache.values_between(from, to).await
    }

    pub async fn cache_contents(&self) -> Result<Vec<PointValueTime>> {
        self.cache.cache_contents().await
    }

    pub async fn invalidate_cache(&self, full: bool) {
        self.cache.invalidate(full).await
    }

    pub async fn reset_values(&self) -> Result<()> {
        self.cache.reset_values().await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::time::ManualTimeProvider;
    use crate::MemoryPointValueStore;

    async fn runtime(
        point: DataPointConfig,
        now: i64,
    ) -> (Arc<MemoryPointValueStore>, Arc<PointRuntime>) {
        let store = Arc::new(MemoryPointValueStore::new());
        let rt = PointRuntime::initialize(
            point,
            store.clone(),
            Arc::new(ManualTimeProvider::new(now)),
            5,
        )
        .await
        .unwrap();
        (store, rt)
    }

    async fn stored_times(store: &MemoryPointValueStore, point: &DataPointConfig) -> Vec<i64> {
        store.flush_pending().await.unwrap();
        store
            .point_values_between(point, i64::MIN, i64::MAX)
            .await
            .unwrap()
            .iter()
            .map(|v| v.time)
            .collect()
    }

    #[tokio::test]
    async fn test_on_change_respects_tolerance() {
        let point = DataPointConfig::new(1, DataType::Numeric).with_tolerance(0.5);
        let (store, rt) = runtime(point.clone(), 0).await;

        for (v, t) in [(10.0, 1), (10.3, 2), (10.6, 3), (10.9, 4)] {
            rt.update_point_value(PointValueTime::numeric(v, t), false)
                .await
                .unwrap();
        }

        // 10.3 and 10.9 are within tolerance of the last logged value
        assert_eq!(stored_times(&store, &point).await, vec![1, 3]);
        // but the cache still sees them
        assert_eq!(rt.current_value().unwrap().time, 4);
        assert_eq!(rt.latest_point_value().await.unwrap().unwrap().time, 4);
    }

    #[tokio::test]
    async fn test_logging_all_and_none() {
        let all = DataPointConfig::new(1, DataType::Binary).with_logging(LoggingType::All);
        let (store, rt) = runtime(all.clone(), 0).await;
        for t in 1..=3 {
            rt.update_point_value(PointValueTime::binary(true, t), false)
                .await
                .unwrap();
        }
        assert_eq!(stored_times(&store, &all).await, vec![1, 2, 3]);

        let none = DataPointConfig::new(2, DataType::Binary).with_logging(LoggingType::None);
        let (store, rt) = runtime(none.clone(), 0).await;
        rt.update_point_value(PointValueTime::binary(true, 1), false)
            .await
            .unwrap();
        assert!(stored_times(&store, &none).await.is_empty());
    }

    #[tokio::test]
    async fn test_on_ts_change() {
        let point =
            DataPointConfig::new(1, DataType::Multistate).with_logging(LoggingType::OnTsChange);
        let (store, rt) = runtime(point.clone(), 0).await;
        for (v, t) in [(1, 10), (2, 10), (2, 20)] {
            rt.update_point_value(PointValueTime::multistate(v, t), false)
                .await
                .unwrap();
        }
        assert_eq!(stored_times(&store, &point).await, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_backdated_value_keeps_current() {
        let point = DataPointConfig::new(1, DataType::Numeric);
        let (store, rt) = runtime(point.clone(), 0).await;

        rt.update_point_value(PointValueTime::numeric(1.0, 100), false)
            .await
            .unwrap();
        rt.update_point_value(PointValueTime::numeric(1.0, 50), false)
            .await
            .unwrap();

        assert_eq!(rt.current_value().unwrap().time, 100);
        assert_eq!(stored_times(&store, &point).await, vec![50, 100]);
        let cached: Vec<i64> = rt.cache_contents().await.unwrap().iter().map(|v| v.time).collect();
        assert_eq!(cached, vec![100, 50]);
    }

    #[tokio::test]
    async fn test_type_mismatch_rejected() {
        let point = DataPointConfig::new(1, DataType::Numeric);
        let (_store, rt) = runtime(point, 0).await;
        assert!(rt
            .update_point_value(PointValueTime::binary(true, 1), false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_interval_first_boundary() {
        let point = DataPointConfig::new(1, DataType::Numeric)
            .with_logging(LoggingType::Interval)
            .with_interval(1000, IntervalLoggingType::Instant);
        let (_store, rt) = runtime(point.clone(), 1_234).await;
        assert_eq!(rt.next_boundary(), Some(2_234));

        let (_store, rt) = runtime(point.with_quantized_intervals(true), 1_234).await;
        assert_eq!(rt.next_boundary(), Some(2_000));
    }

    #[tokio::test]
    async fn test_interval_writes_each_boundary() {
        let point = DataPointConfig::new(1, DataType::Numeric)
            .with_logging(LoggingType::Interval)
            .with_interval(1000, IntervalLoggingType::Instant);
        let (store, rt) = runtime(point.clone(), 0).await;

        rt.update_point_value(PointValueTime::numeric(5.0, 100), false)
            .await
            .unwrap();
        assert_eq!(rt.poll_interval(999).await, 0);
        assert_eq!(rt.poll_interval(3_000).await, 3);

        assert_eq!(stored_times(&store, &point).await, vec![1000, 2000, 3000]);
        assert_eq!(rt.next_boundary(), Some(4_000));
    }

    #[tokio::test]
    async fn test_interval_samples_visible_to_history_queries() {
        let point = DataPointConfig::new(1, DataType::Numeric)
            .with_logging(LoggingType::Interval)
            .with_interval(1000, IntervalLoggingType::Instant);
        let (store, rt) = runtime(point.clone(), 0).await;

        rt.update_point_value(PointValueTime::numeric(5.0, 100), false)
            .await
            .unwrap();
        rt.poll_interval(1_000).await;
        rt.update_point_value(PointValueTime::numeric(6.0, 1_500), false)
            .await
            .unwrap();
        rt.poll_interval(2_000).await;
        store.flush_pending().await.unwrap();

        // The window spans [100, 1500] but holds no boundary samples
        let cached: Vec<i64> = rt.cache_contents().await.unwrap().iter().map(|v| v.time).collect();
        assert_eq!(cached, vec![1_500, 100]);

        let between: Vec<i64> = rt
            .point_values_between(100, 2_001)
            .await
            .unwrap()
            .iter()
            .map(|v| v.time)
            .collect();
        assert_eq!(between, vec![100, 1_000, 1_500, 2_000]);
        assert_eq!(rt.point_value_before(1_500).await.unwrap().unwrap().time, 1_000);
        assert_eq!(rt.point_value_at(1_000).await.unwrap().unwrap().time, 1_000);
        assert_eq!(rt.point_value_after(1_001).await.unwrap().unwrap().time, 1_500);
        assert_eq!(rt.point_value_after(1_501).await.unwrap().unwrap().time, 2_000);
    }

    #[tokio::test]
    async fn test_interval_aggregates() {
        for (kind, expected) in [
            (IntervalLoggingType::Maximum, 9.0),
            (IntervalLoggingType::Minimum, 1.0),
            (IntervalLoggingType::Average, 5.0),
        ] {
            let point = DataPointConfig::new(1, DataType::Numeric)
                .with_logging(LoggingType::Interval)
                .with_interval(1000, kind);
            let (store, rt) = runtime(point.clone(), 0).await;
            for (v, t) in [(1.0, 100), (9.0, 200), (5.0, 300)] {
                rt.update_point_value(PointValueTime::numeric(v, t), false)
                    .await
                    .unwrap();
            }
            rt.poll_interval(1_000).await;
            store.flush_pending().await.unwrap();
            let logged = store.point_value_at(&point, 1_000).await.unwrap().unwrap();
            assert_eq!(logged.value.as_f64(), Some(expected), "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_on_change_interval_resets_boundary() {
        let point = DataPointConfig::new(1, DataType::Numeric)
            .with_logging(LoggingType::OnChangeInterval)
            .with_interval(1000, IntervalLoggingType::Instant);
        let (store, rt) = runtime(point.clone(), 0).await;
        assert_eq!(rt.next_boundary(), Some(1_000));

        rt.update_point_value(PointValueTime::numeric(1.0, 700), false)
            .await
            .unwrap();
        assert_eq!(rt.next_boundary(), Some(1_700));

        // Unchanged value does not move the boundary
        rt.update_point_value(PointValueTime::numeric(1.0, 900), false)
            .await
            .unwrap();
        assert_eq!(rt.next_boundary(), Some(1_700));

        assert_eq!(rt.poll_interval(1_700).await, 1);
        assert_eq!(stored_times(&store, &point).await, vec![700, 1_700]);
    }

    #[tokio::test]
    async fn test_start_and_terminate() {
        let point = DataPointConfig::new(1, DataType::Numeric)
            .with_logging(LoggingType::Interval)
            .with_interval(60_000, IntervalLoggingType::Instant);
        let (_store, rt) = runtime(point, 0).await;
        rt.start();
        rt.terminate().await;
        assert!(rt.interval_task.lock().is_none());
    }
}
