use slog::{error, info, warn, Logger};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use weather_ingest_core::DEFAULT_TARGET_TABLE;

use crate::{
    normalize_batch, render_location_header, render_point_table, write_batch, Fetcher,
    GridResolver, IngestError, Location, LocationOutcome, LocationResolver, LocationSummary, Mode,
    RunReport, WarehouseConnection, WarehouseConnector, WarehouseLoader, WeatherFetcher,
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mode: Mode,
    pub locations: Vec<Location>,
    pub dry_run: bool,
    pub output_dir: PathBuf,
    pub grid_model: String,
    pub target_table: String,
    pub keep_failed_batches: bool,
    pub fail_fast: bool,
}

impl PipelineSettings {
    pub fn new(mode: Mode, locations: Vec<Location>) -> Self {
        PipelineSettings {
            mode,
            locations,
            dry_run: false,
            output_dir: std::env::temp_dir(),
            grid_model: weather_ingest_core::DEFAULT_GRID_MODEL.to_string(),
            target_table: DEFAULT_TARGET_TABLE.to_string(),
            keep_failed_batches: false,
            fail_fast: false,
        }
    }
}

/// Runs every configured location through resolve, fetch, normalize, write and load
pub struct Pipeline {
    logger: Logger,
    settings: PipelineSettings,
    connector: Option<Arc<dyn WarehouseConnector>>,
    location_resolver: LocationResolver,
    grid_resolver: GridResolver,
    weather_fetcher: WeatherFetcher,
    loader: WarehouseLoader,
}

impl Pipeline {
    pub fn new(
        logger: Logger,
        fetcher: Arc<dyn Fetcher>,
        connector: Option<Arc<dyn WarehouseConnector>>,
        settings: PipelineSettings,
    ) -> Self {
        let location_resolver = LocationResolver::new(logger.clone(), fetcher.clone());
        let grid_resolver =
            GridResolver::new(logger.clone(), fetcher.clone()).with_model(&settings.grid_model);
        let weather_fetcher = WeatherFetcher::new(logger.clone(), fetcher);
        let loader = WarehouseLoader::new(logger.clone(), &settings.target_table);
        Pipeline {
            logger,
            settings,
            connector,
            location_resolver,
            grid_resolver,
            weather_fetcher,
            loader,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Locations run strictly one after another over a single warehouse session.
    /// Only configuration and connection problems fail the whole run.
    pub async fn run(&self) -> Result<RunReport, IngestError> {
        if self.settings.locations.is_empty() {
            return Err(IngestError::Config(String::from(
                "no locations configured; pass --location or set `locations` in the config file",
            )));
        }

        let connection = if self.settings.dry_run {
            info!(self.logger, "dry run: skipping warehouse connection and load");
            None
        } else {
            let connector = self.connector.as_ref().ok_or_else(|| {
                IngestError::Config(String::from("no warehouse connector configured"))
            })?;
            Some(connector.connect().await.map_err(IngestError::Connect)?)
        };

        let mut report = RunReport::new(self.settings.mode);
        let total = self.settings.locations.len();
        for (index, location) in self.settings.locations.iter().enumerate() {
            let result = self.process_location(location, connection.as_deref()).await;
            let failed = result.is_err();
            if let Err(e) = &result {
                error!(self.logger, "{} failed: {}", location, e);
            }
            report.outcomes.push(LocationOutcome {
                location: location.label(),
                result,
            });

            if failed && self.settings.fail_fast {
                let skipped = total - index - 1;
                if skipped > 0 {
                    warn!(self.logger, "fail-fast: skipping {} remaining locations", skipped);
                }
                break;
            }
        }

        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                error!(self.logger, "failed to close warehouse connection: {}", e);
            }
        }

        info!(
            self.logger,
            "run finished: {} locations, {} failed, {} records loaded",
            report.outcomes.len(),
            report.failures(),
            report.records_loaded()
        );
        Ok(report)
    }

    async fn process_location(
        &self,
        location: &Location,
        connection: Option<&dyn WarehouseConnection>,
    ) -> Result<LocationSummary, IngestError> {
        let mode = self.settings.mode;
        let label = location.label();

        let bbox = self.location_resolver.resolve(location).await?;
        let grid = self.grid_resolver.resolve(&bbox).await?;
        println!("{}", render_location_header(&label, mode, &bbox, grid.len()));

        let responses = self.weather_fetcher.fetch(&grid, mode).await?;
        let batch = normalize_batch(&responses, &label, mode)?;
        for table in &batch.tables {
            println!("{}", render_point_table(table));
        }

        let file = write_batch(
            &self.logger,
            &batch,
            &self.settings.output_dir,
            OffsetDateTime::now_utc(),
        )?;
        println!("JSON written to {}", file.path().display());
        let file_name = file.file_name();

        let loaded = match connection {
            None => false,
            Some(connection) => {
                if let Err(e) = self.loader.load(connection, file.path()).await {
                    if self.settings.keep_failed_batches {
                        let kept = file.keep();
                        warn!(self.logger, "kept failed batch for replay: {}", kept.display());
                    }
                    return Err(e);
                }
                println!("Uploaded {} to {}", file_name, self.loader.table());
                true
            }
        };

        if let Err(e) = file.remove() {
            warn!(self.logger, "failed to remove {}: {}", file_name, e);
        }

        Ok(LocationSummary {
            bbox,
            grid_points: grid.len(),
            records: batch.record_count(),
            file_name,
            loaded,
        })
    }
}
