use anyhow::anyhow;
use slog::{error, info};
use std::sync::Arc;
use weather_ingest::{
    get_config_info, setup_logger, Fetcher, HttpFetcher, Pipeline, ResponseCache,
    SnowflakeConnector, WarehouseConnector,
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let (cli, config_source) = get_config_info()?;
    let logger = setup_logger(&cli);

    info!(logger, "Weather ingest starting...");
    info!(logger, "  Config: {}", config_source);
    let settings = cli.pipeline_settings()?;
    info!(logger, "  Mode: {}", settings.mode);
    info!(logger, "  Locations: {}", settings.locations.len());
    info!(logger, "  Output dir: {}", settings.output_dir.display());
    info!(logger, "  Target table: {}", settings.target_table);

    let cache = if cli.cache_expiry().is_zero() {
        None
    } else {
        Some(ResponseCache::new(cli.cache_dir(), cli.cache_expiry()))
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
        logger.clone(),
        &cli.user_agent(),
        cli.max_retries(),
        cache,
    )?);

    // credentials are only required when something will be loaded
    let connector: Option<Arc<dyn WarehouseConnector>> = if settings.dry_run {
        None
    } else {
        let warehouse = cli.warehouse_settings()?;
        Some(Arc::new(SnowflakeConnector::new(logger.clone(), warehouse)?))
    };

    let pipeline = Pipeline::new(logger.clone(), fetcher, connector, settings);
    let report = pipeline.run().await?;

    println!();
    println!("Run summary ({} mode):", report.mode);
    for outcome in &report.outcomes {
        println!("  {}", outcome.summary_line());
    }

    if report.has_failures() {
        error!(
            logger,
            "{} of {} locations failed",
            report.failures(),
            report.outcomes.len()
        );
        return Err(anyhow!("{} locations failed", report.failures()));
    }
    Ok(())
}
