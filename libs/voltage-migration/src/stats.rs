//! Lock-free migration progress counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::series::MigrationStatus;

/// Weight of the newest sample in the per-series duration average
const DURATION_EMA_ALPHA: f64 = 0.1;

/// Counters shared by all workers
#[derive(Debug)]
pub struct MigrationStats {
    pub total: AtomicU64,
    pub migrated: AtomicU64,
    pub skipped: AtomicU64,
    pub no_data: AtomicU64,
    pub errors: AtomicU64,
    pub passes: AtomicU64,
    pub retries: AtomicU64,
    pub values_copied: AtomicU64,
    /// Total ms spent on finished series
    pub total_duration_ms: AtomicU64,
    /// f64 bits of the moving average; NaN until the first sample
    avg_duration_bits: AtomicU64,
}

impl Default for MigrationStats {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            migrated: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            no_data: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            values_copied: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            avg_duration_bits: AtomicU64::new(f64::NAN.to_bits()),
        }
    }
}

impl MigrationStats {
    /// Count a series that reached a terminal status
    pub fn record_finished(&self, status: MigrationStatus, duration_ms: Option<u64>) {
        let counter = match status {
            MigrationStatus::Migrated => &self.migrated,
            MigrationStatus::Skipped => &self.skipped,
            MigrationStatus::NoData => &self.no_data,
            MigrationStatus::Error => &self.errors,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(ms) = duration_ms {
            self.total_duration_ms.fetch_add(ms, Ordering::Relaxed);
            let sample = ms as f64;
            let _ = self
                .avg_duration_bits
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                    let current = f64::from_bits(bits);
                    let next = if current.is_nan() {
                        sample
                    } else {
                        current + DURATION_EMA_ALPHA * (sample - current)
                    };
                    Some(next.to_bits())
                });
        }
    }

    pub fn finished(&self) -> u64 {
        self.migrated.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
            + self.no_data.load(Ordering::Relaxed)
            + self.errors.load(Ordering::Relaxed)
    }

    /// Point-in-time view; `workers` scales the ETA
    pub fn snapshot(&self, workers: usize) -> MigrationStatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let finished = self.finished();
        let remaining = total.saturating_sub(finished);
        let percent_complete = if total == 0 {
            100.0
        } else {
            finished as f64 * 100.0 / total as f64
        };

        let avg = f64::from_bits(self.avg_duration_bits.load(Ordering::Acquire));
        let avg_series_ms = (!avg.is_nan()).then_some(avg);
        let eta = avg_series_ms.map(|avg| {
            let ms = avg * remaining as f64 / workers.max(1) as f64;
            Duration::from_millis(ms.max(0.0) as u64)
        });

        MigrationStatsSnapshot {
            total,
            migrated: self.migrated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            no_data: self.no_data.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            remaining,
            passes: self.passes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            values_copied: self.values_copied.load(Ordering::Relaxed),
            percent_complete,
            avg_series_ms,
            eta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatsSnapshot {
    pub total: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub no_data: u64,
    pub errors: u64,
    pub remaining: u64,
    pub passes: u64,
    pub retries: u64,
    pub values_copied: u64,
    pub percent_complete: f64,
    pub avg_series_ms: Option<f64>,
    #[serde(with = "humantime_serde")]
    pub eta: Option<Duration>,
}
