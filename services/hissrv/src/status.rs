//! Offline migration progress inspection for the CLI

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use voltage_migration::{progress, MigrationStatus};

use crate::Result;

/// Per-status row counts of the progress table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    /// Oldest watermark among unfinished series
    pub lowest_watermark: Option<i64>,
}

impl ProgressSummary {
    pub fn count(&self, status: MigrationStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn finished(&self) -> usize {
        [
            MigrationStatus::Migrated,
            MigrationStatus::Skipped,
            MigrationStatus::NoData,
            MigrationStatus::Error,
        ]
        .into_iter()
        .map(|s| self.count(s))
        .sum()
    }
}

pub async fn progress_summary(pool: &SqlitePool) -> Result<ProgressSummary> {
    progress::ensure_schema(pool).await?;
    let mut summary = ProgressSummary::default();
    for record in progress::get_all(pool).await? {
        summary.total += 1;
        *summary.by_status.entry(record.status.as_str()).or_default() += 1;
        if !record.status.is_terminal() {
            if let Some(ts) = record.timestamp {
                summary.lowest_watermark = Some(summary.lowest_watermark.map_or(ts, |w| w.min(ts)));
            }
        }
    }
    Ok(summary)
}

/// Delete every progress row, returning how many were removed
pub async fn reset_progress(pool: &SqlitePool) -> Result<u64> {
    progress::ensure_schema(pool).await?;
    Ok(progress::delete_all(pool).await?)
}
