//! End-to-end migration tests
//!
//! Two in-memory stores, an in-memory progress table and a manual clock.
//! With one-hour blocks and "now" at 10:30 every series is copied in ten
//! hourly windows plus a final window `[10:00, 12:00)`.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use voltage_migration::progress;
use voltage_migration::{
    MigrationConfig, MigrationEngine, MigrationPointValueStore, MigrationStatus, PassOutcome,
    ProgressRecord, StaticSeriesResolver,
};
use voltage_model::{DataPointConfig, PointValueTime, SeriesId};
use voltage_rtdb::helpers::{create_test_memory_store, create_test_point, numeric_series};
use voltage_rtdb::{ManualTimeProvider, MemoryPointValueStore, PointValueStore};

const MINUTE: i64 = 60_000;
const HOUR: i64 = 60 * MINUTE;
const NOW: i64 = 10 * HOUR + 30 * MINUTE;

struct Fixture {
    engine: MigrationEngine,
    primary: Arc<MemoryPointValueStore>,
    secondary: Arc<MemoryPointValueStore>,
    pool: SqlitePool,
    clock: Arc<ManualTimeProvider>,
}

fn test_config() -> MigrationConfig {
    MigrationConfig {
        enabled: true,
        block_size: Duration::from_secs(3600),
        thread_count: 2,
        read_chunk_size: 7,
        write_chunk_size: 5,
        max_attempts: 2,
        log_period: Duration::from_secs(1),
        close_wait: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn setup(points: Vec<DataPointConfig>, config: MigrationConfig) -> Fixture {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    progress::ensure_schema(&pool).await.unwrap();

    let primary = create_test_memory_store();
    let secondary = create_test_memory_store();
    let clock = Arc::new(ManualTimeProvider::new(NOW));
    let engine = MigrationEngine::new(
        config,
        primary.clone(),
        secondary.clone(),
        Arc::new(StaticSeriesResolver::new(points)),
        pool.clone(),
        clock.clone(),
    )
    .unwrap();

    Fixture {
        engine,
        primary,
        secondary,
        pool,
        clock,
    }
}

/// Samples every 10 minutes from 00:00 to 11:00 inclusive, plus one at 13:00
async fn seed_history(store: &MemoryPointValueStore, point: &DataPointConfig) {
    let mut times: Vec<i64> = (0..=66).map(|i| i * 10 * MINUTE).collect();
    times.push(13 * HOUR);
    store
        .save_point_values(point, &numeric_series(times))
        .await
        .unwrap();
}

async fn drive(engine: &MigrationEngine, series_id: SeriesId) -> MigrationStatus {
    for _ in 0..100 {
        match engine.run_pass(series_id).await.unwrap() {
            PassOutcome::Requeue => continue,
            PassOutcome::Finished(status) => return status,
            PassOutcome::AlreadyFinished => {
                return engine.registry().status(series_id).unwrap();
            },
        }
    }
    panic!("series {} did not finish", series_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_migration_with_workers() {
    let points: Vec<_> = (1..=3).map(create_test_point).collect();
    let fx = setup(points.clone(), test_config()).await;
    for point in &points {
        seed_history(&fx.secondary, point).await;
    }

    fx.engine.start().await.unwrap();
    fx.engine.join().await.unwrap();
    assert!(fx.engine.is_finished());

    for point in &points {
        // 00:00..=11:00 copied, 13:00 lies beyond the final window
        assert_eq!(fx.primary.value_count(point), 67);
        assert!(fx
            .primary
            .point_value_at(point, 13 * HOUR)
            .await
            .unwrap()
            .is_none());
    }

    let rows = progress::get_all(&fx.pool).await.unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.status, MigrationStatus::Migrated);
        assert_eq!(row.timestamp, Some(12 * HOUR));
    }

    let stats = fx.engine.stats();
    assert_eq!(stats.migrated, 3);
    assert_eq!(stats.remaining, 0);
    assert_eq!(stats.percent_complete, 100.0);
    assert_eq!(stats.values_copied, 3 * 67);
}

#[tokio::test]
async fn test_migrated_series_is_not_copied_again() {
    let point = create_test_point(1);
    let fx = setup(vec![point.clone()], test_config()).await;
    seed_history(&fx.secondary, &point).await;

    fx.engine.load().await.unwrap();
    assert_eq!(drive(&fx.engine, 1).await, MigrationStatus::Migrated);

    let copied = fx.engine.stats().values_copied;
    let series = fx.engine.registry().get(1).unwrap();
    let watermark = series.watermark();

    assert_eq!(
        fx.engine.run_pass(1).await.unwrap(),
        PassOutcome::AlreadyFinished
    );
    assert_eq!(fx.engine.stats().values_copied, copied);
    assert_eq!(series.watermark(), watermark);
    assert_eq!(fx.engine.stats().migrated, 1);
}

#[tokio::test]
async fn test_skipped_and_no_data() {
    let empty = create_test_point(1);
    let fx = setup(vec![empty], test_config()).await;
    // Progress row for a point that no longer exists
    progress::update(&fx.pool, &ProgressRecord::not_started(9))
        .await
        .unwrap();

    fx.engine.load().await.unwrap();
    assert_eq!(drive(&fx.engine, 1).await, MigrationStatus::NoData);
    assert_eq!(drive(&fx.engine, 9).await, MigrationStatus::Skipped);

    let stats = fx.engine.stats();
    assert_eq!(stats.no_data, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn test_resume_from_persisted_watermark() {
    let point = create_test_point(1);
    let fx = setup(vec![point.clone()], test_config()).await;
    seed_history(&fx.secondary, &point).await;
    progress::update(
        &fx.pool,
        &ProgressRecord {
            series_id: 1,
            status: MigrationStatus::Running,
            timestamp: Some(5 * HOUR),
        },
    )
    .await
    .unwrap();

    fx.engine.load().await.unwrap();
    assert_eq!(drive(&fx.engine, 1).await, MigrationStatus::Migrated);

    // 05:00..=11:00
    assert_eq!(fx.primary.value_count(&point), 37);
    assert!(fx
        .primary
        .point_value_before(&point, 5 * HOUR)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_terminal_progress_is_not_requeued() {
    let point = create_test_point(1);
    let fx = setup(vec![point.clone()], test_config()).await;
    seed_history(&fx.secondary, &point).await;
    progress::update(
        &fx.pool,
        &ProgressRecord {
            series_id: 1,
            status: MigrationStatus::Migrated,
            timestamp: Some(12 * HOUR),
        },
    )
    .await
    .unwrap();

    fx.engine.start().await.unwrap();
    fx.engine.join().await.unwrap();
    assert!(fx.engine.is_finished());
    assert_eq!(fx.primary.value_count(&point), 0);
    assert_eq!(fx.engine.stats().migrated, 1);
}

#[tokio::test]
async fn test_migrate_from_floor() {
    let point = create_test_point(1);
    let config = MigrationConfig {
        migrate_from: Some(8 * HOUR),
        ..test_config()
    };
    let fx = setup(vec![point.clone()], config).await;
    seed_history(&fx.secondary, &point).await;

    fx.engine.load().await.unwrap();
    assert_eq!(drive(&fx.engine, 1).await, MigrationStatus::Migrated);
    // 08:00..=11:00
    assert_eq!(fx.primary.value_count(&point), 19);
}

#[tokio::test]
async fn test_retry_then_error() {
    let point = create_test_point(1);
    let fx = setup(vec![point.clone()], test_config()).await;
    seed_history(&fx.secondary, &point).await;
    fx.secondary.fail_reads(true);

    fx.engine.load().await.unwrap();
    assert_eq!(fx.engine.run_pass(1).await.unwrap(), PassOutcome::Requeue);
    assert_eq!(
        fx.engine.registry().status(1),
        Some(MigrationStatus::NotStarted)
    );

    assert_eq!(
        fx.engine.run_pass(1).await.unwrap(),
        PassOutcome::Finished(MigrationStatus::Error)
    );
    let stats = fx.engine.stats();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.errors, 1);

    let rows = progress::get_all(&fx.pool).await.unwrap();
    assert_eq!(rows[0].status, MigrationStatus::Error);
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    let point = create_test_point(1);
    let fx = setup(vec![point.clone()], test_config()).await;
    seed_history(&fx.secondary, &point).await;

    fx.engine.load().await.unwrap();
    // Initial pass, then fail the first copy
    assert_eq!(fx.engine.run_pass(1).await.unwrap(), PassOutcome::Requeue);
    fx.primary.fail_writes(true);
    assert_eq!(fx.engine.run_pass(1).await.unwrap(), PassOutcome::Requeue);
    assert_eq!(
        fx.engine.registry().status(1),
        Some(MigrationStatus::NotStarted)
    );

    fx.primary.fail_writes(false);
    assert_eq!(drive(&fx.engine, 1).await, MigrationStatus::Migrated);
    assert_eq!(fx.primary.value_count(&point), 67);
}

#[tokio::test]
async fn test_final_window_picks_up_live_writes() {
    let point = create_test_point(1);
    let fx = setup(vec![point.clone()], test_config()).await;
    seed_history(&fx.secondary, &point).await;
    let routing = MigrationPointValueStore::new(
        fx.primary.clone(),
        fx.secondary.clone(),
        fx.engine.registry(),
    );

    fx.engine.load().await.unwrap();
    let series = fx.engine.registry().get(1).unwrap();
    while series.watermark() != Some(10 * HOUR) {
        assert_eq!(fx.engine.run_pass(1).await.unwrap(), PassOutcome::Requeue);
    }

    // Queued in the secondary store's write buffer
    routing
        .save_point_value_async(&point, PointValueTime::numeric(1.0, NOW + 1))
        .await
        .unwrap();
    assert!(fx
        .primary
        .point_value_at(&point, NOW + 1)
        .await
        .unwrap()
        .is_none());

    assert_eq!(
        fx.engine.run_pass(1).await.unwrap(),
        PassOutcome::Finished(MigrationStatus::Migrated)
    );
    assert!(fx
        .primary
        .point_value_at(&point, NOW + 1)
        .await
        .unwrap()
        .is_some());

    routing
        .save_point_value_sync(&point, PointValueTime::numeric(2.0, NOW + 2))
        .await
        .unwrap();
    assert!(fx
        .secondary
        .point_value_at(&point, NOW + 2)
        .await
        .unwrap()
        .is_none());
    assert!(routing
        .point_value_at(&point, NOW + 2)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_buffered_write_before_block_end_is_copied() {
    let point = create_test_point(1);
    let config = MigrationConfig {
        block_size: Duration::from_secs(1),
        ..test_config()
    };
    let fx = setup(vec![point.clone()], config).await;
    fx.clock.set(500);
    fx.secondary
        .save_point_values(&point, &numeric_series([0]))
        .await
        .unwrap();
    let routing = MigrationPointValueStore::new(
        fx.primary.clone(),
        fx.secondary.clone(),
        fx.engine.registry(),
    );

    fx.engine.load().await.unwrap();
    assert_eq!(fx.engine.run_pass(1).await.unwrap(), PassOutcome::Requeue);

    // Still in the write buffer when the clock passes the block end
    routing
        .save_point_value_async(&point, PointValueTime::numeric(999.0, 999))
        .await
        .unwrap();
    fx.clock.set(1_005);

    assert_eq!(fx.engine.run_pass(1).await.unwrap(), PassOutcome::Requeue);
    assert_eq!(
        fx.engine.run_pass(1).await.unwrap(),
        PassOutcome::Finished(MigrationStatus::Migrated)
    );

    assert!(fx.primary.point_value_at(&point, 999).await.unwrap().is_some());
    assert_eq!(
        routing.point_value_at(&point, 999).await.unwrap().map(|v| v.time),
        Some(999)
    );
    assert_eq!(fx.primary.value_count(&point), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resize_worker_pool() {
    let points: Vec<_> = (1..=20).map(create_test_point).collect();
    let config = MigrationConfig {
        thread_count: 1,
        ..test_config()
    };
    let fx = setup(points.clone(), config).await;
    for point in &points {
        seed_history(&fx.secondary, point).await;
    }

    fx.engine.start().await.unwrap();
    fx.engine.set_thread_count(4);
    assert!(fx.engine.thread_count() <= 4);
    fx.engine.join().await.unwrap();

    assert!(fx.engine.is_finished());
    assert_eq!(fx.engine.stats().migrated, 20);
    for point in &points {
        assert_eq!(fx.primary.value_count(point), 67);
    }
}

#[tokio::test]
async fn test_shrink_to_zero_stops_workers() {
    let point = create_test_point(1);
    let fx = setup(vec![point.clone()], test_config()).await;
    seed_history(&fx.secondary, &point).await;

    fx.engine.start().await.unwrap();
    fx.engine.set_thread_count(0);
    assert_eq!(fx.engine.thread_count(), 0);
    fx.engine.join().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let points: Vec<_> = (1..=5).map(create_test_point).collect();
    let fx = setup(points.clone(), test_config()).await;
    for point in &points {
        seed_history(&fx.secondary, point).await;
    }

    fx.engine.start().await.unwrap();
    fx.engine.shutdown().await.unwrap();
    assert_eq!(fx.engine.thread_count(), 0);
}

#[tokio::test]
async fn test_load_twice_fails() {
    let fx = setup(vec![create_test_point(1)], test_config()).await;
    fx.engine.load().await.unwrap();
    assert!(fx.engine.start().await.is_err());
}

#[tokio::test]
async fn test_reset_clears_progress() {
    let fx = setup(vec![create_test_point(1)], test_config()).await;
    progress::insert_all(
        &fx.pool,
        &[ProgressRecord::not_started(1), ProgressRecord::not_started(2)],
    )
    .await
    .unwrap();

    assert_eq!(fx.engine.reset().await.unwrap(), 2);
    assert_eq!(progress::count(&fx.pool).await.unwrap(), 0);

    fx.engine.load().await.unwrap();
    assert!(fx.engine.reset().await.is_err());
    assert_eq!(fx.engine.stats().total, 1);
}
