use serde::Deserialize;
use slog::{debug, info, Logger};
use std::sync::Arc;

use crate::{FetchFailure, Fetcher, GridPoints, IngestError, Mode};

pub const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Hourly variables requested for every point, in record order
pub const HOURLY_VARIABLES: [&str; 4] = [
    "temperature_2m",
    "is_day",
    "precipitation_probability",
    "precipitation",
];

const HOURLY_INTERVAL_SECS: i64 = 3600;

/// Open-Meteo answers a multi-point query with an array and a single point with a bare object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProviderPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub hourly: Option<ProviderHourly>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProviderHourly {
    #[serde(default)]
    pub time: Vec<i64>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub is_day: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
}

/// Hourly series for one point: the window [start, end) in unix seconds stepped by `interval`
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyBlock {
    pub start: i64,
    pub end: i64,
    pub interval: i64,
    pub temperature_2m: Vec<Option<f64>>,
    pub is_day: Vec<Option<f64>>,
    pub precipitation_probability: Vec<Option<f64>>,
    pub precipitation: Vec<Option<f64>>,
}

impl ProviderHourly {
    /// The provider sends an explicit hourly time axis; the block keeps only its bounds and step,
    /// so the axis must be evenly spaced for the bounds to describe it
    fn into_block(self, index: usize) -> Result<HourlyBlock, FetchFailure> {
        let malformed = |reason: &'static str| FetchFailure::MalformedTimeAxis { index, reason };
        let interval = match self.time.as_slice() {
            [first, second, ..] => second.checked_sub(*first).ok_or(malformed("step overflows"))?,
            _ => HOURLY_INTERVAL_SECS,
        };
        if interval <= 0 {
            return Err(malformed("timestamps are not ascending"));
        }
        if self
            .time
            .windows(2)
            .any(|pair| pair[1].checked_sub(pair[0]) != Some(interval))
        {
            return Err(malformed("timestamps are not evenly spaced"));
        }

        let start = self.time.first().copied().unwrap_or_default();
        let end = match self.time.last() {
            Some(last) => last.checked_add(interval).ok_or(malformed("end overflows"))?,
            None => start,
        };
        Ok(HourlyBlock {
            start,
            end,
            interval,
            temperature_2m: self.temperature_2m,
            is_day: self.is_day,
            precipitation_probability: self.precipitation_probability,
            precipitation: self.precipitation,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawPointResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub hourly: HourlyBlock,
}

pub struct WeatherFetcher {
    logger: Logger,
    fetcher: Arc<dyn Fetcher>,
    forecast_url: String,
}

impl WeatherFetcher {
    pub fn new(logger: Logger, fetcher: Arc<dyn Fetcher>) -> Self {
        WeatherFetcher {
            logger,
            fetcher,
            forecast_url: OPEN_METEO_FORECAST_URL.to_string(),
        }
    }

    pub fn with_forecast_url(mut self, forecast_url: impl Into<String>) -> Self {
        self.forecast_url = forecast_url.into();
        self
    }

    pub fn query_params(grid: &GridPoints, mode: Mode) -> Vec<(String, String)> {
        vec![
            (String::from("latitude"), join_coordinates(&grid.latitudes)),
            (String::from("longitude"), join_coordinates(&grid.longitudes)),
            (String::from("hourly"), HOURLY_VARIABLES.join(",")),
            (String::from("wind_speed_unit"), String::from("mph")),
            (String::from("temperature_unit"), String::from("fahrenheit")),
            (String::from("precipitation_unit"), String::from("inch")),
            (String::from("timeformat"), String::from("unixtime")),
            (String::from("past_hours"), mode.past_hours().to_string()),
            (String::from("forecast_hours"), mode.forecast_hours().to_string()),
        ]
    }

    /// One batched request for every point; responses come back in submission order
    pub async fn fetch(
        &self,
        grid: &GridPoints,
        mode: Mode,
    ) -> Result<Vec<RawPointResponse>, IngestError> {
        if grid.is_empty() {
            debug!(self.logger, "empty grid, skipping weather request");
            return Ok(vec![]);
        }

        let failed = |reason: FetchFailure| IngestError::Fetch {
            what: "hourly weather",
            reason,
        };
        let body = self
            .fetcher
            .fetch_text(&self.forecast_url, &Self::query_params(grid, mode))
            .await
            .map_err(|e| failed(e.into()))?;
        let responses = parse_point_responses(&body, grid.len()).map_err(failed)?;
        info!(
            self.logger,
            "fetched {} hourly series ({} mode)",
            responses.len(),
            mode
        );
        Ok(responses)
    }
}

fn join_coordinates(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_point_responses(
    body: &str,
    expected: usize,
) -> Result<Vec<RawPointResponse>, FetchFailure> {
    let points = serde_json::from_str::<OneOrMany<ProviderPoint>>(body)?.into_vec();
    if points.len() != expected {
        return Err(FetchFailure::PointCountMismatch {
            expected,
            found: points.len(),
        });
    }

    points
        .into_iter()
        .enumerate()
        .map(|(index, point)| {
            let hourly = point.hourly.ok_or(FetchFailure::MissingHourly(index))?;
            Ok(RawPointResponse {
                latitude: point.latitude,
                longitude: point.longitude,
                hourly: hourly.into_block(index)?,
            })
        })
        .collect()
}
