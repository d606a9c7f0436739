use clap::Parser;
use slog::{o, Drain, Level, Logger};
use std::{env, path::PathBuf, time::Duration};
use weather_ingest_core::{
    find_config_file, get_xdg_cache_dir, load_config, ConfigSource, CONFIG_ENV_VAR,
    CONFIG_FILE_NAME, DEFAULT_CACHE_EXPIRY_SECS, DEFAULT_GRID_MODEL, DEFAULT_MAX_RETRIES,
    DEFAULT_TARGET_TABLE, DEFAULT_USER_AGENT,
};

use crate::{IngestError, Location, Mode, PipelineSettings, WarehouseSettings};

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Weather Ingest - Loads hourly Open-Meteo weather for configured locations into Snowflake"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $WEATHER_INGEST_CONFIG, ./weather-ingest.toml,
    /// $XDG_CONFIG_HOME/weather-ingest/weather-ingest.toml, /etc/weather-ingest/weather-ingest.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "WEATHER_INGEST_LEVEL")]
    pub level: Option<String>,

    /// history (past 24 hours) or forecast (next hour)
    #[arg(short, long, value_enum, env = "WEATHER_INGEST_MODE")]
    pub mode: Option<Mode>,

    /// Location to ingest, "City, Region" or free-form text; repeatable
    #[arg(long = "location")]
    #[serde(default)]
    pub locations: Vec<Location>,

    /// Fetch, normalize and write files without touching the warehouse
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub dry_run: Option<bool>,

    /// Directory for transient batch files (system temp dir by default)
    #[arg(short, long, env = "WEATHER_INGEST_OUTPUT_DIR")]
    pub output_dir: Option<String>,

    /// HTTP User-Agent header for geocoding and weather requests
    #[arg(short, long, env = "WEATHER_INGEST_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Directory for cached provider responses
    #[arg(long, env = "WEATHER_INGEST_CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// Seconds a cached response stays fresh; 0 disables the cache
    #[arg(long, env = "WEATHER_INGEST_CACHE_EXPIRY_SECS")]
    pub cache_expiry_secs: Option<u64>,

    /// Retries for transient provider failures
    #[arg(long, env = "WEATHER_INGEST_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Provider model whose grid cells are enumerated
    #[arg(long, env = "WEATHER_INGEST_GRID_MODEL")]
    pub grid_model: Option<String>,

    /// Warehouse table receiving the batches
    #[arg(long, env = "WEATHER_INGEST_TARGET_TABLE")]
    pub target_table: Option<String>,

    /// Keep a batch file on disk when its load fails
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub keep_failed_batches: Option<bool>,

    /// Stop at the first failed location
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub fail_fast: Option<bool>,

    #[arg(long, env = "SNOWFLAKE_ACCOUNT")]
    pub snowflake_account: Option<String>,

    #[arg(long, env = "SNOWFLAKE_USER")]
    pub snowflake_user: Option<String>,

    #[arg(long, env = "SNOWFLAKE_PASSWORD", hide_env_values = true)]
    pub snowflake_password: Option<String>,

    #[arg(long, env = "SNOWFLAKE_DATABASE")]
    pub snowflake_database: Option<String>,

    #[arg(long, env = "SNOWFLAKE_SCHEMA")]
    pub snowflake_schema: Option<String>,

    #[arg(long, env = "SNOWFLAKE_WAREHOUSE")]
    pub snowflake_warehouse: Option<String>,
}

impl Cli {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(get_xdg_cache_dir)
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expiry_secs.unwrap_or(DEFAULT_CACHE_EXPIRY_SECS))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn grid_model(&self) -> String {
        self.grid_model
            .clone()
            .unwrap_or_else(|| DEFAULT_GRID_MODEL.to_string())
    }

    pub fn target_table(&self) -> String {
        self.target_table
            .clone()
            .unwrap_or_else(|| DEFAULT_TARGET_TABLE.to_string())
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }

    pub fn keep_failed_batches(&self) -> bool {
        self.keep_failed_batches.unwrap_or(false)
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast.unwrap_or(false)
    }

    /// CLI values win; lists and flags fall back to the file when unset.
    /// `--dry-run=false` turns off a flag the file enables.
    pub fn merge(self, file_config: Cli) -> Cli {
        Cli {
            config: self.config,
            level: self.level.or(file_config.level),
            mode: self.mode.or(file_config.mode),
            locations: if self.locations.is_empty() {
                file_config.locations
            } else {
                self.locations
            },
            dry_run: self.dry_run.or(file_config.dry_run),
            output_dir: self.output_dir.or(file_config.output_dir),
            user_agent: self.user_agent.or(file_config.user_agent),
            cache_dir: self.cache_dir.or(file_config.cache_dir),
            cache_expiry_secs: self.cache_expiry_secs.or(file_config.cache_expiry_secs),
            max_retries: self.max_retries.or(file_config.max_retries),
            grid_model: self.grid_model.or(file_config.grid_model),
            target_table: self.target_table.or(file_config.target_table),
            keep_failed_batches: self.keep_failed_batches.or(file_config.keep_failed_batches),
            fail_fast: self.fail_fast.or(file_config.fail_fast),
            snowflake_account: self.snowflake_account.or(file_config.snowflake_account),
            snowflake_user: self.snowflake_user.or(file_config.snowflake_user),
            snowflake_password: self.snowflake_password.or(file_config.snowflake_password),
            snowflake_database: self.snowflake_database.or(file_config.snowflake_database),
            snowflake_schema: self.snowflake_schema.or(file_config.snowflake_schema),
            snowflake_warehouse: self.snowflake_warehouse.or(file_config.snowflake_warehouse),
        }
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings, IngestError> {
        let mode = self.mode.ok_or_else(|| {
            IngestError::Config(String::from(
                "mode is required (--mode history|forecast or `mode` in the config file)",
            ))
        })?;
        if self.locations.is_empty() {
            return Err(IngestError::Config(String::from(
                "at least one location is required (--location or `locations` in the config file)",
            )));
        }

        Ok(PipelineSettings {
            mode,
            locations: self.locations.clone(),
            dry_run: self.dry_run(),
            output_dir: self.output_dir(),
            grid_model: self.grid_model(),
            target_table: self.target_table(),
            keep_failed_batches: self.keep_failed_batches(),
            fail_fast: self.fail_fast(),
        })
    }

    /// Every Snowflake field must be present; the error names all missing ones
    pub fn warehouse_settings(&self) -> Result<WarehouseSettings, IngestError> {
        let fields = [
            ("snowflake_account", &self.snowflake_account),
            ("snowflake_user", &self.snowflake_user),
            ("snowflake_password", &self.snowflake_password),
            ("snowflake_database", &self.snowflake_database),
            ("snowflake_schema", &self.snowflake_schema),
            ("snowflake_warehouse", &self.snowflake_warehouse),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::Config(format!(
                "missing warehouse settings: {}",
                missing.join(", ")
            )));
        }

        let value = |field: &Option<String>| field.clone().unwrap_or_default();
        Ok(WarehouseSettings {
            account: value(&self.snowflake_account),
            user: value(&self.snowflake_user),
            password: value(&self.snowflake_password),
            database: value(&self.snowflake_database),
            schema: value(&self.snowflake_schema),
            warehouse: value(&self.snowflake_warehouse),
        })
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Result<(Cli, ConfigSource), anyhow::Error> {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file(CONFIG_ENV_VAR, CONFIG_FILE_NAME)
    };

    let file_config: Cli = load_config(&source)?;

    // CLI args override file config (env vars are handled by clap)
    Ok((cli_args.merge(file_config), source))
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = match cli.level.as_ref() {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    };

    // stdout carries the progress report, logs go to stderr
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}
