//! Configuration file discovery and loading
//!
//! Settings are layered, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Config file (searched in standard locations)
//! 4. Built-in defaults

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::de::DeserializeOwned;

use crate::APP_NAME;

/// Where a configuration file was found
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Path given on the command line or through the config env var
    Explicit(PathBuf),
    /// Found in the current working directory
    CurrentDir(PathBuf),
    /// Found under $XDG_CONFIG_HOME/weather-ingest/ (or ~/.config/weather-ingest/)
    XdgConfig(PathBuf),
    /// Found under /etc/weather-ingest/
    System(PathBuf),
    /// No file found, built-in defaults apply
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::CurrentDir(p)
            | ConfigSource::XdgConfig(p)
            | ConfigSource::System(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path() {
            Some(p) => write!(f, "{}", p.display()),
            None => write!(f, "(defaults)"),
        }
    }
}

/// Find the first existing configuration file
///
/// Search order:
/// 1. `env_var` (e.g. WEATHER_INGEST_CONFIG)
/// 2. `filename` in the current directory
/// 3. XDG config home
/// 4. /etc/weather-ingest/
pub fn find_config_file(env_var: &str, filename: &str) -> ConfigSource {
    config_candidates(env_var, filename)
        .into_iter()
        .find(|candidate| candidate.path().is_some_and(|p| p.exists()))
        .unwrap_or(ConfigSource::Defaults)
}

fn config_candidates(env_var: &str, filename: &str) -> Vec<ConfigSource> {
    let mut candidates = Vec::with_capacity(4);
    if let Ok(path) = env::var(env_var) {
        candidates.push(ConfigSource::Explicit(PathBuf::from(path)));
    }
    candidates.push(ConfigSource::CurrentDir(PathBuf::from(filename)));
    candidates.push(ConfigSource::XdgConfig(xdg_dir("XDG_CONFIG_HOME", ".config").join(filename)));
    candidates.push(ConfigSource::System(
        PathBuf::from("/etc").join(APP_NAME).join(filename),
    ));
    candidates
}

/// Resolve an XDG base directory for the application, falling back to `$HOME/<home_suffix>`
fn xdg_dir(xdg_var: &str, home_suffix: &str) -> PathBuf {
    if let Ok(base) = env::var(xdg_var) {
        PathBuf::from(base).join(APP_NAME)
    } else if let Ok(home) = env::var("HOME") {
        PathBuf::from(home).join(home_suffix).join(APP_NAME)
    } else {
        PathBuf::from(home_suffix).join(APP_NAME)
    }
}

/// XDG cache directory for the application, used for HTTP response caching
pub fn get_xdg_cache_dir() -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", ".cache")
}

/// Load and parse a TOML configuration file
///
/// Returns `T::default()` when `source` is [`ConfigSource::Defaults`].
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    let Some(path) = source.path() else {
        return Ok(T::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}
