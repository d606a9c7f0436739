use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use time::OffsetDateTime;

/// A place to ingest weather for, either a (city, region) pair or free-form text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    CityRegion { city: String, region: String },
    Place(String),
}

impl Location {
    pub fn city_region(city: impl Into<String>, region: impl Into<String>) -> Self {
        Location::CityRegion {
            city: city.into(),
            region: region.into(),
        }
    }

    pub fn place(name: impl Into<String>) -> Self {
        Location::Place(name.into())
    }

    /// Display label stamped on every record, `"city, region"` or the raw place text
    pub fn label(&self) -> String {
        match self {
            Location::CityRegion { city, region } => format!("{}, {}", city, region),
            Location::Place(name) => name.clone(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// `"City, Region"` becomes a pair (split at the first comma), anything else stays free-form
impl FromStr for Location {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err(String::from("location must not be empty"));
        }
        if let Some((city, region)) = value.split_once(',') {
            let (city, region) = (city.trim(), region.trim());
            if !city.is_empty() && !region.is_empty() {
                return Ok(Location::city_region(city, region));
            }
        }
        Ok(Location::place(value))
    }
}

/// Rectangular region in decimal degrees. Ordering of the edges is not validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south_lat: f64,
    pub north_lat: f64,
    pub west_lon: f64,
    pub east_lon: f64,
}

impl BoundingBox {
    /// Provider query form: `south,west,north,east`
    pub fn as_query(&self) -> String {
        format!(
            "{},{},{},{}",
            self.south_lat, self.west_lon, self.north_lat, self.east_lon
        )
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "south_lat={} north_lat={} west_lon={} east_lon={}",
            self.south_lat, self.north_lat, self.west_lon, self.east_lon
        )
    }
}

/// Provider-native grid cells as parallel coordinate lists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridPoints {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
}

impl GridPoints {
    pub fn len(&self) -> usize {
        self.latitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latitudes.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.latitudes
            .iter()
            .copied()
            .zip(self.longitudes.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Past 24 hours, for backfill
    History,
    /// Next hour, for frequent scheduled runs
    Forecast,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::History => "history",
            Mode::Forecast => "forecast",
        }
    }

    pub fn past_hours(&self) -> u32 {
        match self {
            Mode::History => 24,
            Mode::Forecast => 0,
        }
    }

    pub fn forecast_hours(&self) -> u32 {
        match self {
            Mode::History => 0,
            Mode::Forecast => 1,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRecord {
    pub timestamp: OffsetDateTime,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_2m: Option<f64>,
    pub is_day: Option<u8>,
    pub precipitation_probability: Option<f64>,
    pub precipitation: Option<f64>,
    pub mode: Mode,
}

/// All records for one grid point, in timestamp order
#[derive(Debug, Clone, PartialEq)]
pub struct PointTable {
    pub latitude: f64,
    pub longitude: f64,
    pub records: Vec<WeatherRecord>,
}

/// Everything ingested for one (location, mode) pair; backs one file and one load
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionBatch {
    pub location: String,
    pub mode: Mode,
    pub tables: Vec<PointTable>,
}

impl IngestionBatch {
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.records.len()).sum()
    }

    pub fn records(&self) -> impl Iterator<Item = &WeatherRecord> {
        self.tables.iter().flat_map(|t| t.records.iter())
    }
}
