//! VoltageEMS History Migration
//!
//! Moves point-value history from a secondary (old) store into a primary
//! (new) store while both stay online.
//!
//! # Key Components
//!
//! - **MigrationEngine**: resizable worker pool driving each series through
//!   `NOT_STARTED -> ... -> MIGRATED`
//! - **MigrationPointValueStore**: routes live reads/writes to the right store
//! - **progress**: SQLite table of per-series status and watermark, used to
//!   resume after a restart
//! - **MigrationStats**: counters, percent complete and ETA

pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod series;
pub mod stats;
pub mod store;

pub use config::MigrationConfig;
pub use engine::{MigrationEngine, PassOutcome};
pub use error::{MigrationError, Result};
pub use progress::ProgressRecord;
pub use registry::{SeriesRegistry, StoreOperation};
pub use resolver::{SeriesResolver, StaticSeriesResolver};
pub use series::{MigrationSeries, MigrationStatus};
pub use stats::{MigrationStats, MigrationStatsSnapshot};
pub use store::MigrationPointValueStore;
