//! Migration engine
//!
//! Copies every series from the secondary (old) store into the primary
//! (new) store with a resizable pool of worker tasks pulling from a shared
//! queue. Each pass over a series does a bounded amount of work and puts
//! the series back on the queue until it reaches a terminal status:
//!
//! ```text
//! NOT_STARTED -> RUNNING -> INITIAL_PASS_COMPLETE -> RUNNING -> ... -> MIGRATED
//!                        \-> SKIPPED | NO_DATA | ERROR
//! ```
//!
//! The initial pass only computes the starting watermark. Later passes copy
//! one block-aligned window `[from, to)`; the window that contains "now" is
//! the final one and is copied under the series' exclusive lock together
//! with one extra block, after which live writes go to the primary store.

use crossbeam::queue::SegQueue;
use futures::StreamExt;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use voltage_model::{DataPointConfig, SeriesId, TimeOrder};
use voltage_rtdb::{PointValueStore, TimeProvider};

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::progress::{self, ProgressRecord};
use crate::registry::{SeriesRegistry, StoreOperation};
use crate::resolver::SeriesResolver;
use crate::series::{MigrationSeries, MigrationStatus};
use crate::stats::{MigrationStats, MigrationStatsSnapshot};

/// How long an idle worker waits before polling the queue again
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Result of one pass over a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// More work remains, put the series back on the queue
    Requeue,
    /// The series reached this terminal status during the pass
    Finished(MigrationStatus),
    /// The series was already terminal, nothing was done
    AlreadyFinished,
}

struct Worker {
    id: usize,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<()>>,
}

#[derive(Default)]
struct WorkerPool {
    active: Vec<Worker>,
    /// Workers told to stop by a shrink, kept so `join` sees their result
    retired: Vec<JoinHandle<Result<()>>>,
    progress_logger: Option<JoinHandle<()>>,
}

struct EngineInner {
    config: MigrationConfig,
    primary: Arc<dyn PointValueStore>,
    secondary: Arc<dyn PointValueStore>,
    resolver: Arc<dyn SeriesResolver>,
    db: SqlitePool,
    time: Arc<dyn TimeProvider>,
    registry: Arc<SeriesRegistry>,
    queue: SegQueue<Arc<MigrationSeries>>,
    /// Series not yet in a terminal status
    remaining: AtomicUsize,
    thread_target: AtomicUsize,
    stats: MigrationStats,
    started: AtomicBool,
    stopping: AtomicBool,
    next_worker_id: AtomicUsize,
}

pub struct MigrationEngine {
    inner: Arc<EngineInner>,
    pool: Mutex<WorkerPool>,
}

impl MigrationEngine {
    pub fn new(
        config: MigrationConfig,
        primary: Arc<dyn PointValueStore>,
        secondary: Arc<dyn PointValueStore>,
        resolver: Arc<dyn SeriesResolver>,
        db: SqlitePool,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let thread_target = AtomicUsize::new(config.thread_count);
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                primary,
                secondary,
                resolver,
                db,
                time,
                registry: Arc::new(SeriesRegistry::new()),
                queue: SegQueue::new(),
                remaining: AtomicUsize::new(0),
                thread_target,
                stats: MigrationStats::default(),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                next_worker_id: AtomicUsize::new(0),
            }),
            pool: Mutex::new(WorkerPool::default()),
        })
    }

    /// Status map shared with the routing store
    pub fn registry(&self) -> Arc<SeriesRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn handle_with_primary(&self, series_id: SeriesId, op: StoreOperation) -> Result<bool> {
        self.inner.registry.handle_with_primary(series_id, op)
    }

    pub fn stats(&self) -> MigrationStatsSnapshot {
        self.inner
            .stats
            .snapshot(self.inner.thread_target.load(Ordering::Acquire))
    }

    /// Started and every series is terminal
    pub fn is_finished(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
            && self.inner.remaining.load(Ordering::Acquire) == 0
    }

    /// Load progress, register and queue series
    ///
    /// Series already recorded as terminal are not queued; series recorded
    /// mid-migration resume from their persisted watermark. Points without
    /// a progress row are added as `NOT_STARTED`.
    pub async fn load(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(MigrationError::AlreadyStarted);
        }
        let inner = &self.inner;

        progress::ensure_schema(&inner.db).await?;
        let mut records = progress::get_all(&inner.db).await?;
        let known: HashSet<SeriesId> = records.iter().map(|r| r.series_id).collect();
        let added: Vec<ProgressRecord> = inner
            .resolver
            .series_ids()
            .into_iter()
            .filter(|id| !known.contains(id))
            .map(ProgressRecord::not_started)
            .collect();
        if !added.is_empty() {
            progress::insert_all(&inner.db, &added).await?;
            records.extend(added);
        }

        let mut queued = 0usize;
        for record in &records {
            let series = Arc::new(MigrationSeries::restore(
                record.series_id,
                record.status,
                record.timestamp,
            ));
            inner.registry.insert(Arc::clone(&series));
            if record.status.is_terminal() {
                inner.stats.record_finished(record.status, None);
            } else {
                inner.queue.push(series);
                queued += 1;
            }
        }
        inner.remaining.store(queued, Ordering::Release);
        inner
            .stats
            .total
            .store(records.len() as u64, Ordering::Relaxed);

        info!(
            total = records.len(),
            queued,
            finished = records.len() - queued,
            "Migration loaded"
        );
        Ok(())
    }

    /// Delete all progress rows so the next start migrates from scratch
    pub async fn reset(&self) -> Result<u64> {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(MigrationError::AlreadyStarted);
        }
        progress::ensure_schema(&self.inner.db).await?;
        let removed = progress::delete_all(&self.inner.db).await?;
        info!(removed, "Migration progress reset");
        Ok(removed)
    }

    /// Load progress and start the worker pool and progress logger
    pub async fn start(&self) -> Result<()> {
        self.load().await?;
        let logger = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { progress_loop(inner).await })
        };
        self.pool.lock().progress_logger = Some(logger);
        self.set_thread_count(self.inner.thread_target.load(Ordering::Acquire));
        Ok(())
    }

    /// Grow or shrink the worker pool
    ///
    /// Shrinking signals the newest workers to stop after their current
    /// series. Before `start` this only records the target.
    pub fn set_thread_count(&self, count: usize) {
        self.inner.thread_target.store(count, Ordering::Release);
        if !self.inner.started.load(Ordering::Acquire) {
            return;
        }

        let mut pool = self.pool.lock();
        // Finished workers move to retired so join still sees their result
        let (running, finished): (Vec<_>, Vec<_>) =
            pool.active.drain(..).partition(|w| !w.handle.is_finished());
        pool.active = running;
        pool.retired.extend(finished.into_iter().map(|w| w.handle));
        while pool.active.len() < count {
            pool.active.push(self.spawn_worker());
        }
        while pool.active.len() > count {
            if let Some(worker) = pool.active.pop() {
                worker.stop.store(true, Ordering::Release);
                debug!(worker_id = worker.id, "Migration worker asked to stop");
                pool.retired.push(worker.handle);
            }
        }
        info!(threads = count, "Migration thread count set");
    }

    /// Workers currently running
    pub fn thread_count(&self) -> usize {
        self.pool
            .lock()
            .active
            .iter()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    fn spawn_worker(&self) -> Worker {
        let id = self.inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let inner = Arc::clone(&self.inner);
            let stop = Arc::clone(&stop);
            tokio::spawn(async move { worker_loop(inner, id, stop).await })
        };
        Worker { id, stop, handle }
    }

    /// Run one pass over a series outside the worker pool
    pub async fn run_pass(&self, series_id: SeriesId) -> Result<PassOutcome> {
        let series = self.inner.registry.get(series_id).ok_or_else(|| {
            MigrationError::Config(format!("series {} is not registered", series_id))
        })?;
        let outcome = self.inner.pass(&series).await?;
        if matches!(outcome, PassOutcome::Finished(_)) {
            self.inner.remaining.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(outcome)
    }

    /// Wait for every worker to exit, returning the first worker error
    pub async fn join(&self) -> Result<()> {
        let (handles, logger) = self.take_handles();
        let result = join_handles(handles).await;
        if let Some(logger) = logger {
            logger.abort();
        }
        result
    }

    /// Stop all workers after their current series, waiting at most
    /// `close_wait`
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.stopping.store(true, Ordering::Release);
        let (handles, logger) = self.take_handles();
        if let Some(logger) = logger {
            logger.abort();
        }

        let close_wait = self.inner.config.close_wait;
        match tokio::time::timeout(close_wait, join_handles(handles)).await {
            Ok(result) => {
                info!("Migration stopped");
                result
            },
            Err(_) => {
                warn!(?close_wait, "Migration workers did not stop in time");
                Err(MigrationError::ShutdownTimeout(close_wait))
            },
        }
    }

    fn take_handles(&self) -> (Vec<JoinHandle<Result<()>>>, Option<JoinHandle<()>>) {
        let mut pool = self.pool.lock();
        let mut handles: Vec<_> = pool
            .active
            .drain(..)
            .map(|w| w.handle)
            .collect();
        handles.append(&mut pool.retired);
        (handles, pool.progress_logger.take())
    }
}

async fn join_handles(handles: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first_error = None;
    for handle in handles {
        let err = match handle.await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => MigrationError::Worker(e.to_string()),
        };
        if first_error.is_none() {
            first_error = Some(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

// ============================================================================
// Workers
// ============================================================================

async fn worker_loop(inner: Arc<EngineInner>, worker_id: usize, stop: Arc<AtomicBool>) -> Result<()> {
    debug!(worker_id, "Migration worker started");
    let result = loop {
        if stop.load(Ordering::Acquire) || inner.stopping.load(Ordering::Acquire) {
            break Ok(());
        }
        let Some(series) = inner.queue.pop() else {
            if inner.remaining.load(Ordering::Acquire) == 0 {
                break Ok(());
            }
            // Another worker holds the last series and may requeue it
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        match inner.pass(&series).await {
            Ok(PassOutcome::Requeue) => inner.queue.push(series),
            Ok(PassOutcome::Finished(_)) => {
                if inner.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    info!(stats = ?inner.stats.snapshot(1), "Migration complete");
                }
            },
            Ok(PassOutcome::AlreadyFinished) => {},
            Err(e) => {
                // The series is abandoned so other workers can drain
                inner.remaining.fetch_sub(1, Ordering::AcqRel);
                error!(worker_id, series_id = series.series_id(), error = %e, "Migration worker terminated");
                break Err(e);
            },
        }
    };
    debug!(worker_id, "Migration worker stopped");
    result
}

async fn progress_loop(inner: Arc<EngineInner>) {
    let mut ticker = tokio::time::interval(inner.config.log_period);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snap = inner
            .stats
            .snapshot(inner.thread_target.load(Ordering::Acquire));
        info!(
            percent = format!("{:.1}", snap.percent_complete),
            migrated = snap.migrated,
            skipped = snap.skipped,
            no_data = snap.no_data,
            errors = snap.errors,
            remaining = snap.remaining,
            values = snap.values_copied,
            eta = ?snap.eta,
            "Migration progress"
        );
        if inner.remaining.load(Ordering::Acquire) == 0 || inner.stopping.load(Ordering::Acquire) {
            break;
        }
    }
}

// ============================================================================
// Per-series state machine
// ============================================================================

impl EngineInner {
    /// One pass with failure handling
    ///
    /// Retryable failures requeue the series as `NOT_STARTED` until
    /// `max_attempts`; other non-fatal failures mark it `ERROR`. Fatal
    /// errors are returned.
    async fn pass(&self, series: &MigrationSeries) -> Result<PassOutcome> {
        let series_id = series.series_id();
        match self.process(series).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let attempts = series.record_failure();
                if e.is_retryable() && attempts < self.config.max_attempts {
                    warn!(series_id, attempts, error = %e, "Series pass failed, requeued");
                    series.transition(MigrationStatus::NotStarted)?;
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    self.persist(series).await;
                    Ok(PassOutcome::Requeue)
                } else {
                    error!(series_id, attempts, error = %e, "Series migration failed");
                    self.finish(series, MigrationStatus::Error).await
                }
            },
        }
    }

    async fn process(&self, series: &MigrationSeries) -> Result<PassOutcome> {
        let _pass = series.begin_pass()?;
        self.stats.passes.fetch_add(1, Ordering::Relaxed);

        match series.status() {
            status if status.is_terminal() => Ok(PassOutcome::AlreadyFinished),
            MigrationStatus::NotStarted => {
                series.transition(MigrationStatus::Running)?;
                series.mark_started(self.time.now_millis());
                self.initial_pass(series).await
            },
            MigrationStatus::InitialPassComplete => {
                series.transition(MigrationStatus::Running)?;
                series.mark_started(self.time.now_millis());
                self.copy_pass(series).await
            },
            _ => {
                series.mark_started(self.time.now_millis());
                self.copy_pass(series).await
            },
        }
    }

    async fn initial_pass(&self, series: &MigrationSeries) -> Result<PassOutcome> {
        let series_id = series.series_id();
        let Some(point) = self.resolver.resolve(series_id) else {
            return self.finish(series, MigrationStatus::Skipped).await;
        };
        let Some(inception) = self.secondary.inception_date(&point).await? else {
            return self.finish(series, MigrationStatus::NoData).await;
        };

        let start = self
            .config
            .migrate_from
            .map_or(inception, |floor| inception.max(floor));
        let watermark = series.advance_watermark(start);
        series.transition(MigrationStatus::InitialPassComplete)?;
        self.persist(series).await;
        debug!(series_id, inception, watermark, "Initial pass complete");
        Ok(PassOutcome::Requeue)
    }

    async fn copy_pass(&self, series: &MigrationSeries) -> Result<PassOutcome> {
        let series_id = series.series_id();
        let Some(point) = self.resolver.resolve(series_id) else {
            return self.finish(series, MigrationStatus::Skipped).await;
        };
        let Some(from) = series.watermark() else {
            return self.initial_pass(series).await;
        };

        let block = self.config.block_size_ms();
        let to = (from.div_euclid(block) + 1) * block;

        if self.time.now_millis() < to {
            // Final window: block live writers for this series only
            let _exclusive = series.copy_lock.write().await;
            // Async writes queued before the lock must be visible to the copy
            self.secondary.flush_pending().await?;
            let end = to.saturating_add(block);
            let copied = self.copy_range(&point, from, end).await?;
            series.advance_watermark(end);
            let outcome = self.finish(series, MigrationStatus::Migrated).await?;
            info!(series_id, copied, watermark = end, "Series migrated");
            Ok(outcome)
        } else {
            // A write buffered before `to` passed must land in this window
            self.secondary.flush_pending().await?;
            let copied = self.copy_range(&point, from, to).await?;
            series.advance_watermark(to);
            self.persist(series).await;
            trace!(series_id, from, to, copied, "Window copied");
            Ok(PassOutcome::Requeue)
        }
    }

    /// Stream `[from, to)` from secondary into primary
    async fn copy_range(&self, point: &DataPointConfig, from: i64, to: i64) -> Result<usize> {
        let write_chunk = self.config.write_chunk_size;
        let mut stream = self.secondary.stream_point_values(
            point,
            from,
            to,
            TimeOrder::Ascending,
            self.config.read_chunk_size,
        );

        let mut pending = Vec::with_capacity(write_chunk);
        let mut copied = 0usize;
        while let Some(chunk) = stream.next().await {
            pending.extend(chunk?);
            while pending.len() >= write_chunk {
                let batch: Vec<_> = pending.drain(..write_chunk).collect();
                copied += self.primary.save_point_values(point, &batch).await?;
            }
        }
        if !pending.is_empty() {
            copied += self.primary.save_point_values(point, &pending).await?;
        }

        self.stats
            .values_copied
            .fetch_add(copied as u64, Ordering::Relaxed);
        Ok(copied)
    }

    async fn finish(&self, series: &MigrationSeries, status: MigrationStatus) -> Result<PassOutcome> {
        series.transition(status)?;
        self.persist(series).await;
        let duration = series
            .started_at()
            .map(|t| (self.time.now_millis() - t).max(0) as u64);
        self.stats.record_finished(status, duration);
        if status != MigrationStatus::Migrated {
            info!(series_id = series.series_id(), %status, "Series finished");
        }
        Ok(PassOutcome::Finished(status))
    }

    /// Save the series' progress row, logging failures
    async fn persist(&self, series: &MigrationSeries) {
        let (status, timestamp) = series.snapshot();
        let record = ProgressRecord {
            series_id: series.series_id(),
            status,
            timestamp,
        };
        if let Err(e) = progress::update(&self.db, &record).await {
            warn!(series_id = record.series_id, error = %e, "Failed to save migration progress");
        }
    }
}
