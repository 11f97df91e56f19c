//! Per-series migration state

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use tokio::sync::RwLock;
use voltage_model::SeriesId;

use crate::error::{MigrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    NotStarted,
    Running,
    InitialPassComplete,
    Migrated,
    /// Data point no longer exists
    Skipped,
    /// Secondary store holds no samples
    NoData,
    Error,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::NotStarted => "NOT_STARTED",
            MigrationStatus::Running => "RUNNING",
            MigrationStatus::InitialPassComplete => "INITIAL_PASS_COMPLETE",
            MigrationStatus::Migrated => "MIGRATED",
            MigrationStatus::Skipped => "SKIPPED",
            MigrationStatus::NoData => "NO_DATA",
            MigrationStatus::Error => "ERROR",
        }
    }

    /// No further passes happen in this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Migrated
                | MigrationStatus::Skipped
                | MigrationStatus::NoData
                | MigrationStatus::Error
        )
    }

    /// Whether the state machine allows `self -> to`
    pub fn can_transition_to(&self, to: MigrationStatus) -> bool {
        use MigrationStatus::*;
        matches!(
            (self, to),
            (NotStarted, Running)
                | (InitialPassComplete, Running)
                | (Running, InitialPassComplete)
                | (Running, Migrated)
                | (Running, Skipped)
                | (Running, NoData)
                | (Running, Error)
                | (Running, NotStarted)
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NOT_STARTED" => Ok(MigrationStatus::NotStarted),
            "RUNNING" => Ok(MigrationStatus::Running),
            "INITIAL_PASS_COMPLETE" => Ok(MigrationStatus::InitialPassComplete),
            "MIGRATED" => Ok(MigrationStatus::Migrated),
            "SKIPPED" => Ok(MigrationStatus::Skipped),
            "NO_DATA" => Ok(MigrationStatus::NoData),
            "ERROR" => Ok(MigrationStatus::Error),
            other => Err(MigrationError::Database(format!(
                "unknown migration status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeriesState {
    status: MigrationStatus,
    /// Everything before the watermark has been copied
    watermark: Option<i64>,
}

/// Migration state of one series
///
/// `copy_lock` orders live writes against the final-window copy: writers
/// hold it shared, the final copy holds it exclusively.
pub struct MigrationSeries {
    series_id: SeriesId,
    state: Mutex<SeriesState>,
    pub(crate) copy_lock: RwLock<()>,
    attempts: AtomicU32,
    in_pass: AtomicBool,
    /// Time of the first pass, for duration stats
    started_at: AtomicI64,
}

impl MigrationSeries {
    pub fn new(series_id: SeriesId) -> Self {
        Self::restore(series_id, MigrationStatus::NotStarted, None)
    }

    /// Rebuild from a persisted progress row
    pub fn restore(series_id: SeriesId, status: MigrationStatus, watermark: Option<i64>) -> Self {
        Self {
            series_id,
            state: Mutex::new(SeriesState { status, watermark }),
            copy_lock: RwLock::new(()),
            attempts: AtomicU32::new(0),
            in_pass: AtomicBool::new(false),
            started_at: AtomicI64::new(i64::MIN),
        }
    }

    pub fn series_id(&self) -> SeriesId {
        self.series_id
    }

    pub fn status(&self) -> MigrationStatus {
        self.state.lock().status
    }

    pub fn watermark(&self) -> Option<i64> {
        self.state.lock().watermark
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub(crate) fn record_failure(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Move to `to`, returning the previous status
    pub fn transition(&self, to: MigrationStatus) -> Result<MigrationStatus> {
        let mut state = self.state.lock();
        let from = state.status;
        if !from.can_transition_to(to) {
            return Err(MigrationError::IllegalTransition {
                series_id: self.series_id,
                from,
                to,
            });
        }
        state.status = to;
        Ok(from)
    }

    /// Raise the watermark; it never moves backwards
    pub fn advance_watermark(&self, to: i64) -> i64 {
        let mut state = self.state.lock();
        let next = state.watermark.map_or(to, |w| w.max(to));
        state.watermark = Some(next);
        next
    }

    pub(crate) fn snapshot(&self) -> (MigrationStatus, Option<i64>) {
        let state = self.state.lock();
        (state.status, state.watermark)
    }

    /// Mark a pass as running; fails if one is already in progress
    pub(crate) fn begin_pass(&self) -> Result<PassGuard<'_>> {
        if self.in_pass.swap(true, Ordering::AcqRel) {
            return Err(MigrationError::ConcurrentPass(self.series_id));
        }
        Ok(PassGuard { series: self })
    }

    pub(crate) fn mark_started(&self, now: i64) {
        let _ = self
            .started_at
            .compare_exchange(i64::MIN, now, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn started_at(&self) -> Option<i64> {
        let t = self.started_at.load(Ordering::Acquire);
        (t != i64::MIN).then_some(t)
    }
}

impl fmt::Debug for MigrationSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (status, watermark) = self.snapshot();
        f.debug_struct("MigrationSeries")
            .field("series_id", &self.series_id)
            .field("status", &status)
            .field("watermark", &watermark)
            .field("attempts", &self.attempts())
            .finish()
    }
}

pub(crate) struct PassGuard<'a> {
    series: &'a MigrationSeries,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.series.in_pass.store(false, Ordering::Release);
    }
}
