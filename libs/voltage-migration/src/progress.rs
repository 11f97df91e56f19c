//! Migration progress repository - SQLite persistence of per-series state
//!
//! One row per series in `ts_migration_progress`, keyed by series id.

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use voltage_model::SeriesId;

use crate::error::Result;
use crate::series::MigrationStatus;

/// One persisted progress row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
    pub series_id: SeriesId,
    pub status: MigrationStatus,
    /// Watermark in ms since epoch
    pub timestamp: Option<i64>,
}

impl ProgressRecord {
    pub fn not_started(series_id: SeriesId) -> Self {
        Self {
            series_id,
            status: MigrationStatus::NotStarted,
            timestamp: None,
        }
    }
}

/// Create the progress table if missing
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ts_migration_progress (
            series_id INTEGER PRIMARY KEY,
            status TEXT NOT NULL,
            timestamp INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert many rows in one transaction
pub async fn insert_all(pool: &SqlitePool, records: &[ProgressRecord]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO ts_migration_progress (series_id, status, timestamp)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(i64::from(record.series_id))
        .bind(record.status.as_str())
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Insert or replace a single row
pub async fn update(pool: &SqlitePool, record: &ProgressRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ts_migration_progress (series_id, status, timestamp)
        VALUES (?, ?, ?)
        ON CONFLICT(series_id) DO UPDATE SET
            status = excluded.status,
            timestamp = excluded.timestamp
        "#,
    )
    .bind(i64::from(record.series_id))
    .bind(record.status.as_str())
    .bind(record.timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load every row ordered by series id
pub async fn get_all(pool: &SqlitePool) -> Result<Vec<ProgressRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT series_id, status, timestamp
        FROM ts_migration_progress
        ORDER BY series_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(hydrate_record(row)?);
    }
    Ok(records)
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM ts_migration_progress")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get::<i64, _>("n")?)
}

/// Delete all progress, returning the number of rows removed
pub async fn delete_all(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM ts_migration_progress")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn hydrate_record(row: SqliteRow) -> Result<ProgressRecord> {
    let series_id: i64 = row.try_get("series_id")?;
    let status: String = row.try_get("status")?;
    let timestamp: Option<i64> = row.try_get("timestamp")?;
    Ok(ProgressRecord {
        series_id: series_id as SeriesId,
        status: status.parse()?,
        timestamp,
    })
}
