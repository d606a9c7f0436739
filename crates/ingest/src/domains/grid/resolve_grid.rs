use slog::{info, Logger};
use std::sync::Arc;

use crate::domains::weather::{OneOrMany, ProviderPoint};
use crate::{
    BoundingBox, FetchFailure, Fetcher, GridPoints, IngestError, OPEN_METEO_FORECAST_URL,
};
use weather_ingest_core::DEFAULT_GRID_MODEL;

/// Enumerates the provider's native grid cells inside a bounding box
pub struct GridResolver {
    logger: Logger,
    fetcher: Arc<dyn Fetcher>,
    forecast_url: String,
    model: String,
}

impl GridResolver {
    pub fn new(logger: Logger, fetcher: Arc<dyn Fetcher>) -> Self {
        GridResolver {
            logger,
            fetcher,
            forecast_url: OPEN_METEO_FORECAST_URL.to_string(),
            model: DEFAULT_GRID_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_forecast_url(mut self, forecast_url: impl Into<String>) -> Self {
        self.forecast_url = forecast_url.into();
        self
    }

    /// Zero forecast hours: the request only lists cells, no weather data
    pub fn query_params(bbox: &BoundingBox, model: &str) -> Vec<(String, String)> {
        vec![
            (String::from("bounding_box"), bbox.as_query()),
            (String::from("models"), model.to_string()),
            (String::from("forecast_hours"), String::from("0")),
        ]
    }

    pub async fn resolve(&self, bbox: &BoundingBox) -> Result<GridPoints, IngestError> {
        let failed = |reason: FetchFailure| IngestError::Fetch {
            what: "grid points",
            reason,
        };
        let body = self
            .fetcher
            .fetch_text(&self.forecast_url, &Self::query_params(bbox, &self.model))
            .await
            .map_err(|e| failed(e.into()))?;
        let grid = parse_grid(&body).map_err(failed)?;
        info!(self.logger, "{} grid points inside {}", grid.len(), bbox);
        Ok(grid)
    }
}

fn parse_grid(body: &str) -> Result<GridPoints, FetchFailure> {
    let cells = serde_json::from_str::<OneOrMany<ProviderPoint>>(body)?.into_vec();
    let (latitudes, longitudes) = cells
        .into_iter()
        .map(|cell| (cell.latitude, cell.longitude))
        .unzip();
    Ok(GridPoints {
        latitudes,
        longitudes,
    })
}
