//! weather-ingest core library
//!
//! Shared utilities for the ingest pipeline:
//! - Configuration file discovery and loading (XDG-compliant)
//! - File system helpers
//! - Default settings

mod config;
pub mod fs;

pub use config::{find_config_file, get_xdg_cache_dir, load_config, ConfigSource};
pub use fs::{create_dir_all, file_age, remove_if_exists};

/// Application name used for XDG paths
pub const APP_NAME: &str = "weather-ingest";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "WEATHER_INGEST_CONFIG";

/// Config file name searched for in the standard locations
pub const CONFIG_FILE_NAME: &str = "weather-ingest.toml";

/// How long a cached HTTP response stays fresh (1 hour)
pub const DEFAULT_CACHE_EXPIRY_SECS: u64 = 3600;

/// Transient-failure retries for provider requests
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Provider model used to enumerate grid cells inside a bounding box
pub const DEFAULT_GRID_MODEL: &str = "icon_global";

/// Warehouse table the batches are copied into
pub const DEFAULT_TARGET_TABLE: &str = "raw_weather";

/// User-Agent sent to the geocoder and weather provider
pub const DEFAULT_USER_AGENT: &str = "weather-pipeline";
