//! hissrv configuration
//!
//! Loaded through `common::load_config`: struct defaults, then the YAML or
//! TOML file, then `HISSRV_*` environment variables (`HISSRV_CACHE__DEFAULT_SIZE=4`).

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use common::LogConfig;
use voltage_events::EventCacheConfig;
use voltage_migration::MigrationConfig;
use voltage_model::DataPointConfig;
use voltage_rtdb::WriteBufferConfig;

use crate::{Result, SERVICE_NAME};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HISSRV_";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/hissrv.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HissrvConfig {
    pub logging: LogConfig,
    pub cache: CacheConfig,
    pub write_buffer: WriteBufferConfig,
    pub migration: MigrationConfig,
    pub events: EventCacheConfig,
    pub database: DatabaseConfig,
    pub points: Vec<DataPointConfig>,
}

impl Default for HissrvConfig {
    fn default() -> Self {
        Self {
            logging: LogConfig {
                service_name: SERVICE_NAME.to_string(),
                ..LogConfig::default()
            },
            cache: CacheConfig::default(),
            write_buffer: WriteBufferConfig::default(),
            migration: MigrationConfig::default(),
            events: EventCacheConfig::default(),
            database: DatabaseConfig::default(),
            points: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per-point cache size for points that do not set their own
    pub default_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_size: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding migration progress
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/hissrv.db"),
        }
    }
}

impl HissrvConfig {
    /// Load from `path` (or defaults only) plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = common::load_config(path, ENV_PREFIX)
            .context("Failed to load hissrv configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.default_size == 0 {
            bail!("cache.default_size must be > 0");
        }
        if self.write_buffer.max_values_per_series == 0 {
            bail!("write_buffer.max_values_per_series must be > 0");
        }
        self.migration
            .validate()
            .context("Invalid migration section")?;
        self.events.validate().context("Invalid events section")?;

        let mut ids = HashSet::new();
        let mut series = HashSet::new();
        for point in &self.points {
            point
                .validate()
                .with_context(|| format!("Invalid point {}", point.id))?;
            if !ids.insert(point.id) {
                bail!("Duplicate point id {}", point.id);
            }
            if !series.insert(point.series_id()) {
                bail!(
                    "Point {} reuses series id {}",
                    point.id,
                    point.series_id()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use voltage_model::{DataType, LoggingType};

    #[test]
    fn test_defaults_are_valid() {
        let config = HissrvConfig::default();
        config.validate().unwrap();
        assert_eq!(config.logging.service_name, "hissrv");
        assert_eq!(config.cache.default_size, 1);
        assert_eq!(config.database.path, PathBuf::from("data/hissrv.db"));
        assert!(!config.migration.enabled);
    }

    #[test]
    fn test_duplicate_point_rejected() {
        let mut config = HissrvConfig::default();
        config.points = vec![
            DataPointConfig::new(1, DataType::Numeric),
            DataPointConfig::new(1, DataType::Binary).with_series_id(9),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate point id 1"));
    }

    #[test]
    fn test_shared_series_rejected() {
        let mut config = HissrvConfig::default();
        config.points = vec![
            DataPointConfig::new(1, DataType::Numeric).with_series_id(5),
            DataPointConfig::new(2, DataType::Numeric)
                .with_series_id(5)
                .with_logging(LoggingType::All),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let mut config = HissrvConfig::default();
        config.cache.default_size = 0;
        assert!(config.validate().is_err());
    }
}
