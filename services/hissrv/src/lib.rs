//! hissrv - history service
//!
//! Caches recent point values in front of the time-series store, migrates
//! history from the old store to the new one in the background and keeps
//! per-user event lists for alarm fan-out.

pub mod app;
pub mod config;
pub mod status;

/// Result type used across the service, anyhow at the binary edge
pub type Result<T> = anyhow::Result<T>;

pub const SERVICE_NAME: &str = "hissrv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{open_progress_pool, HistoryService};
pub use config::HissrvConfig;
