use std::env;
use std::time::Duration;

use clap::Parser;
use slog::{o, Drain, Level, Logger};
use weather_ingest_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_BATCH_PAGE_SIZE, DEFAULT_DB_PORT,
    DEFAULT_RATE_DELAY_SEC,
};

use crate::{default_locations, LocationTarget};

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Weather ingest - collects current conditions per city and upserts into Postgres"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $WEATHER_INGEST_CONFIG, ./ingest.toml,
    /// $XDG_CONFIG_HOME/weather-ingest/ingest.toml, /etc/weather-ingest/ingest.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "WEATHER_INGEST_LEVEL")]
    pub level: Option<String>,

    /// OpenWeather API key (required for `run`)
    #[arg(long, env = "OPENWEATHER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Database host
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Database port
    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Database name
    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Database user
    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Database password
    #[arg(long, env = "DB_PASS", hide_env_values = true)]
    pub db_pass: Option<String>,

    /// Minimum delay between outbound API calls, in seconds.
    /// Also the base unit for retry backoff.
    #[arg(long, env = "RATE_DELAY_SEC")]
    pub rate_delay_sec: Option<f64>,

    /// Rows per physical upsert statement
    #[arg(long, env = "BATCH_PAGE_SIZE")]
    pub batch_page_size: Option<usize>,

    /// Location list, config file only ([[locations]] tables)
    #[arg(skip)]
    #[serde(default)]
    pub locations: Option<Vec<LocationTarget>>,

    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum Command {
    /// One complete pass over the configured locations, then exit
    Run,
    /// Load a CSV export of observations into the store
    ImportCsv {
        /// Path to the CSV file
        path: String,
    },
}

impl Cli {
    pub fn db_host(&self) -> String {
        self.db_host.clone().unwrap_or_else(|| "postgres".to_string())
    }

    pub fn db_port(&self) -> u16 {
        self.db_port.unwrap_or(DEFAULT_DB_PORT)
    }

    pub fn db_name(&self) -> String {
        self.db_name
            .clone()
            .unwrap_or_else(|| "weatherdb".to_string())
    }

    pub fn db_user(&self) -> String {
        self.db_user
            .clone()
            .unwrap_or_else(|| "weatheruser".to_string())
    }

    pub fn db_pass(&self) -> String {
        self.db_pass
            .clone()
            .unwrap_or_else(|| "weatherpass".to_string())
    }

    pub fn rate_delay_sec(&self) -> f64 {
        self.rate_delay_sec.unwrap_or(DEFAULT_RATE_DELAY_SEC)
    }

    pub fn batch_page_size(&self) -> usize {
        self.batch_page_size.unwrap_or(DEFAULT_BATCH_PAGE_SIZE)
    }
}

/// Load configuration from CLI args, environment, and config file
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("WEATHER_INGEST_CONFIG", "ingest.toml")
    };

    let file_config: Cli = load_config(&source).unwrap_or_default();

    // CLI args override file config (env vars are handled by clap)
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        api_key: cli_args.api_key.or(file_config.api_key),
        db_host: cli_args.db_host.or(file_config.db_host),
        db_port: cli_args.db_port.or(file_config.db_port),
        db_name: cli_args.db_name.or(file_config.db_name),
        db_user: cli_args.db_user.or(file_config.db_user),
        db_pass: cli_args.db_pass.or(file_config.db_pass),
        rate_delay_sec: cli_args.rate_delay_sec.or(file_config.rate_delay_sec),
        batch_page_size: cli_args.batch_page_size.or(file_config.batch_page_size),
        locations: file_config.locations,
        command: cli_args.command,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = if let Some(level) = cli.level.as_ref() {
        parse_level(level)
    } else {
        let rust_log = env::var("RUST_LOG").unwrap_or_default();
        parse_level(&rust_log)
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
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

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("OPENWEATHER_API_KEY is not set")]
    MissingApiKey,
    #[error("rate delay must be a non-negative number of seconds, got {0}")]
    BadRateDelay(f64),
    #[error("batch page size must be at least 1")]
    BadPageSize,
}

/// Database connection parameters
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            host: cli.db_host(),
            port: cli.db_port(),
            name: cli.db_name(),
            user: cli.db_user(),
            password: cli.db_pass(),
        }
    }
}

/// Immutable, validated snapshot of everything one ingest run needs.
/// Built once at startup; a missing API key fails here, before any
/// network call.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub api_key: String,
    pub db: DbConfig,
    pub rate_delay: Duration,
    pub page_size: usize,
    pub locations: Vec<LocationTarget>,
}

impl IngestConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let api_key = cli
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            api_key,
            db: DbConfig::from_cli(cli),
            rate_delay: validated_rate_delay(cli)?,
            page_size: validated_page_size(cli)?,
            locations: cli
                .locations
                .clone()
                .filter(|list| !list.is_empty())
                .unwrap_or_else(default_locations),
        })
    }
}

pub fn validated_rate_delay(cli: &Cli) -> Result<Duration, ConfigError> {
    let seconds = cli.rate_delay_sec();
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigError::BadRateDelay(seconds));
    }
    Ok(Duration::from_secs_f64(seconds))
}

pub fn validated_page_size(cli: &Cli) -> Result<usize, ConfigError> {
    let size = cli.batch_page_size();
    if size == 0 {
        return Err(ConfigError::BadPageSize);
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_fails_before_anything_else() {
        let cli = Cli::default();
        let err = IngestConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));

        let cli = Cli {
            api_key: Some(String::new()),
            ..Cli::default()
        };
        let err = IngestConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn defaults_fill_in_everything_but_the_api_key() {
        let cli = Cli {
            api_key: Some("secret".to_string()),
            ..Cli::default()
        };
        let config = IngestConfig::from_cli(&cli).unwrap();

        assert_eq!(config.db.host, "postgres");
        assert_eq!(config.db.port, 5432);
        assert_eq!(config.db.name, "weatherdb");
        assert_eq!(config.rate_delay, Duration::from_secs_f64(1.2));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.locations, default_locations());
    }

    #[test]
    fn config_file_locations_replace_the_default_list() {
        let cli = Cli {
            api_key: Some("secret".to_string()),
            locations: Some(vec![LocationTarget::new("Iloilo", "Iloilo City,PH")]),
            ..Cli::default()
        };
        let config = IngestConfig::from_cli(&cli).unwrap();
        assert_eq!(config.locations.len(), 1);
        assert_eq!(config.locations[0].name, "Iloilo");
    }

    #[test]
    fn nonsense_tunables_are_rejected() {
        let cli = Cli {
            api_key: Some("secret".to_string()),
            rate_delay_sec: Some(-1.0),
            ..Cli::default()
        };
        assert!(matches!(
            IngestConfig::from_cli(&cli),
            Err(ConfigError::BadRateDelay(_))
        ));

        let cli = Cli {
            api_key: Some("secret".to_string()),
            batch_page_size: Some(0),
            ..Cli::default()
        };
        assert!(matches!(
            IngestConfig::from_cli(&cli),
            Err(ConfigError::BadPageSize)
        ));
    }

    #[test]
    fn locations_parse_from_toml() {
        let cli: Cli = toml::from_str(
            r#"
            api_key = "secret"
            rate_delay_sec = 2.0

            [[locations]]
            name = "Manila"
            query = "Manila,PH"
        "#,
        )
        .unwrap();

        assert_eq!(cli.rate_delay_sec(), 2.0);
        let locations = cli.locations.unwrap();
        assert_eq!(locations, vec![LocationTarget::new("Manila", "Manila,PH")]);
    }
}
