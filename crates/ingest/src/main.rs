use std::path::Path;
use std::sync::Arc;

use ingest::{
    get_config_info, import_csv, run_once, setup_logger, validated_page_size, Cli, Command,
    DbConfig, IngestConfig, PgStore, RateLimiter, RetryingFetcher,
};
use slog::{info, Logger};
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = get_config_info();
    let logger = setup_logger(&cli);

    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => run(cli, logger).await,
        Command::ImportCsv { path } => import(cli, logger, &path).await,
    }
}

async fn run(cli: Cli, logger: Logger) -> Result<(), anyhow::Error> {
    // Fail-fast: a missing API key aborts here, before any network call
    let config = IngestConfig::from_cli(&cli)?;

    info!(logger, "weather ingest starting");
    info!(logger, "  locations: {}", config.locations.len());
    info!(logger, "  database: {}:{}/{}", config.db.host, config.db.port, config.db.name);
    info!(logger, "  rate delay: {:.1}s", config.rate_delay.as_secs_f64());

    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(config.rate_delay)));
    let fetcher = RetryingFetcher::new(
        logger.clone(),
        config.api_key.clone(),
        config.rate_delay,
        rate_limiter,
    )?;
    let store = PgStore::new(&config.db, config.page_size);

    let report = run_once(&logger, &fetcher, &store, &config.locations).await?;

    // The scheduler retries whole runs on a non-zero exit; partial success
    // is still success.
    if report.total > 0 && report.written == 0 {
        anyhow::bail!("all {} locations failed, nothing written", report.total);
    }
    Ok(())
}

async fn import(cli: Cli, logger: Logger, path: &str) -> Result<(), anyhow::Error> {
    let page_size = validated_page_size(&cli)?;
    let store = PgStore::new(&DbConfig::from_cli(&cli), page_size);

    let written = import_csv(&logger, &store, Path::new(path)).await?;
    info!(logger, "imported {} rows from {}", written, path);
    Ok(())
}
