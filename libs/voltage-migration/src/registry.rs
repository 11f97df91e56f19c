//! Shared status map of migrating series
//!
//! Consulted by the routing store on every operation, so it is a plain
//! `DashMap` read with no pool-wide lock.

use dashmap::DashMap;
use std::sync::Arc;
use voltage_model::SeriesId;

use crate::error::{MigrationError, Result};
use crate::series::{MigrationSeries, MigrationStatus};

/// Kind of store access being routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Default)]
pub struct SeriesRegistry {
    series: DashMap<SeriesId, Arc<MigrationSeries>>,
}

impl SeriesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, series_id: SeriesId) -> Option<Arc<MigrationSeries>> {
        self.series.get(&series_id).map(|s| Arc::clone(s.value()))
    }

    pub(crate) fn insert(&self, series: Arc<MigrationSeries>) {
        self.series.insert(series.series_id(), series);
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn status(&self, series_id: SeriesId) -> Option<MigrationStatus> {
        self.series.get(&series_id).map(|s| s.status())
    }

    /// Status of every series, ordered by id
    pub fn statuses(&self) -> Vec<(SeriesId, MigrationStatus, Option<i64>)> {
        let mut out: Vec<_> = self
            .series
            .iter()
            .map(|s| {
                let (status, watermark) = s.snapshot();
                (*s.key(), status, watermark)
            })
            .collect();
        out.sort_unstable_by_key(|(id, _, _)| *id);
        out
    }

    /// Whether `op` on the series goes to the primary store
    ///
    /// True iff the series has no migration record or is `MIGRATED`.
    /// Deleting a series that is still migrating is rejected.
    pub fn handle_with_primary(&self, series_id: SeriesId, op: StoreOperation) -> Result<bool> {
        let Some(status) = self.status(series_id) else {
            return Ok(true);
        };
        if status == MigrationStatus::Migrated {
            return Ok(true);
        }
        if op == StoreOperation::Delete {
            return Err(MigrationError::Unsupported {
                series_id,
                operation: "delete point values".to_string(),
            });
        }
        Ok(false)
    }
}
