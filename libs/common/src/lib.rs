//! `VoltageEMS` shared service plumbing
//!
//! - logging setup with runtime level changes
//! - layered configuration loading (defaults, YAML/TOML file, environment)
//! - shutdown signal handling

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use config_loader::load_config;
pub use error::{Error, Result};
pub use logging::{get_log_level, init_with_config, set_log_level, LogConfig};
pub use shutdown::{wait_for_shutdown, ShutdownHandle};
