//! User event cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EventError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventCacheConfig {
    /// Idle time after which a user's entry is dropped
    #[serde(with = "humantime_serde")]
    pub time_to_live: Duration,
    /// Period of the TTL cleaner
    #[serde(with = "humantime_serde")]
    pub cleaner_period: Duration,
}

impl Default for EventCacheConfig {
    fn default() -> Self {
        Self {
            time_to_live: Duration::from_secs(15 * 60),
            cleaner_period: Duration::from_secs(60),
        }
    }
}

impl EventCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.time_to_live.is_zero() {
            return Err(EventError::Config("time_to_live must be > 0".to_string()));
        }
        if self.cleaner_period.is_zero() {
            return Err(EventError::Config("cleaner_period must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_yaml() {
        let config = EventCacheConfig::default();
        assert_eq!(config.time_to_live, Duration::from_secs(900));
        assert!(config.validate().is_ok());

        let config: EventCacheConfig = serde_yaml::from_str("time_to_live: 30s\n").unwrap();
        assert_eq!(config.time_to_live, Duration::from_secs(30));
        assert_eq!(config.cleaner_period, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = EventCacheConfig {
            time_to_live: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
