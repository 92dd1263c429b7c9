//! Weather Ingest Core Library
//!
//! Shared utilities for the ingest pipeline:
//! - Configuration loading (XDG-compliant)
//! - Project-wide defaults

mod config;

pub use config::{find_config_file, load_config, ConfigSource};

/// Application name used for XDG paths
pub const APP_NAME: &str = "weather-ingest";

/// Default Postgres port
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default minimum delay between outbound API calls, in seconds.
/// Doubles as the base unit for retry backoff.
pub const DEFAULT_RATE_DELAY_SEC: f64 = 1.2;

/// Default number of rows per physical upsert statement
pub const DEFAULT_BATCH_PAGE_SIZE: usize = 50;
