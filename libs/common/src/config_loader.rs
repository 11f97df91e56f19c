//! Layered configuration loading
//!
//! Priority, lowest to highest:
//! 1. `T::default()`
//! 2. the config file (YAML or TOML, chosen by extension)
//! 3. environment variables `{PREFIX}SECTION__KEY`

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Load `T` from defaults, an optional file and the environment
///
/// A file that was asked for but does not exist is an error; pass `None`
/// to run on defaults and environment only.
pub fn load_config<T>(path: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            other => {
                return Err(Error::Config(format!(
                    "unsupported config format '{}' for {}",
                    other.unwrap_or(""),
                    path.display()
                )))
            },
        };
        info!("Loading configuration from {}", path.display());
    } else {
        debug!("No config file given, using defaults and environment");
    }

    let config = figment
        .merge(Env::prefixed(env_prefix).split(ENV_SEPARATOR))
        .extract()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        name: String,
        nested: Nested,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Nested {
        size: usize,
        enabled: bool,
    }

    impl Default for Nested {
        fn default() -> Self {
            Self {
                size: 1,
                enabled: false,
            }
        }
    }

    fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_only() {
        let config: Sample = load_config(None, "CLTEST_").unwrap();
        assert_eq!(config, Sample::default());
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_defaults() {
        let file = write_file(".yaml", "name: hist\nnested:\n  size: 8\n");
        let config: Sample = load_config(Some(file.path()), "CLTEST_").unwrap();
        assert_eq!(config.name, "hist");
        assert_eq!(config.nested.size, 8);
        assert!(!config.nested.enabled);
    }

    #[test]
    #[serial]
    fn test_toml_file() {
        let file = write_file(".toml", "name = \"t\"\n[nested]\nenabled = true\n");
        let config: Sample = load_config(Some(file.path()), "CLTEST_").unwrap();
        assert_eq!(config.name, "t");
        assert!(config.nested.enabled);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_file(".yaml", "nested:\n  size: 8\n");
        std::env::set_var("CLTEST_NESTED__SIZE", "16");
        let config: Result<Sample> = load_config(Some(file.path()), "CLTEST_");
        std::env::remove_var("CLTEST_NESTED__SIZE");
        assert_eq!(config.unwrap().nested.size, 16);
    }

    #[test]
    #[serial]
    fn test_missing_and_unsupported_files() {
        let missing = Path::new("/nonexistent/hissrv.yaml");
        assert!(load_config::<Sample>(Some(missing), "CLTEST_").is_err());

        let file = write_file(".ini", "name=x\n");
        assert!(load_config::<Sample>(Some(file.path()), "CLTEST_").is_err());
    }
}
