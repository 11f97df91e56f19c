//! Migration configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MigrationError, Result};

/// Settings of the migration engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Start migration when the service boots
    pub enabled: bool,
    /// Width of one copy window
    #[serde(with = "humantime_serde")]
    pub block_size: Duration,
    /// Number of worker tasks
    pub thread_count: usize,
    /// Samples per streamed read chunk
    pub read_chunk_size: usize,
    /// Samples per bulk write
    pub write_chunk_size: usize,
    /// Failed passes before a series is marked ERROR
    pub max_attempts: u32,
    /// Do not copy samples older than this (ms since epoch)
    pub migrate_from: Option<i64>,
    /// Period of the progress log line
    #[serde(with = "humantime_serde")]
    pub log_period: Duration,
    /// How long shutdown waits for workers to finish their current series
    #[serde(with = "humantime_serde")]
    pub close_wait: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            block_size: Duration::from_secs(24 * 60 * 60),
            thread_count: default_thread_count(),
            read_chunk_size: 10_000,
            write_chunk_size: 10_000,
            max_attempts: 3,
            migrate_from: None,
            log_period: Duration::from_secs(60),
            close_wait: Duration::from_secs(60),
        }
    }
}

/// One worker per four cores, at least one
pub fn default_thread_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 4).max(1)
}

impl MigrationConfig {
    pub fn block_size_ms(&self) -> i64 {
        self.block_size.as_millis() as i64
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size_ms() <= 0 {
            return Err(MigrationError::Config(
                "block_size must be at least 1ms".to_string(),
            ));
        }
        if self.read_chunk_size == 0 || self.write_chunk_size == 0 {
            return Err(MigrationError::Config(
                "read_chunk_size and write_chunk_size must be > 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(MigrationError::Config(
                "max_attempts must be > 0".to_string(),
            ));
        }
        if self.log_period.is_zero() {
            return Err(MigrationError::Config("log_period must be > 0".to_string()));
        }
        Ok(())
    }
}
