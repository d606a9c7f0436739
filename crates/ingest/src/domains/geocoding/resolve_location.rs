use serde::Deserialize;
use serde_json::Value;
use slog::{debug, info, Logger};
use std::sync::Arc;

use crate::{BoundingBox, Fetcher, IngestError, Location, ResolutionFailure};

pub const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";

/*
Nominatim search result, trimmed to what we read:
  [{"place_id": 1, "display_name": "Atlanta, ...", "boundingbox": ["33.6", "33.9", "-84.6", "-84.2"]}]
boundingbox order is south, north, west, east.
*/
#[derive(Debug, Deserialize)]
struct Candidate {
    boundingbox: Option<Vec<Value>>,
}

pub struct LocationResolver {
    logger: Logger,
    fetcher: Arc<dyn Fetcher>,
    search_url: String,
}

impl LocationResolver {
    pub fn new(logger: Logger, fetcher: Arc<dyn Fetcher>) -> Self {
        LocationResolver {
            logger,
            fetcher,
            search_url: NOMINATIM_SEARCH_URL.to_string(),
        }
    }

    pub fn with_search_url(mut self, search_url: impl Into<String>) -> Self {
        self.search_url = search_url.into();
        self
    }

    /// Lookup parameters; always a single best candidate
    pub fn query_params(location: &Location) -> Vec<(String, String)> {
        let mut params = match location {
            Location::CityRegion { city, region } => vec![
                (String::from("city"), city.clone()),
                (String::from("state"), region.clone()),
            ],
            Location::Place(name) => vec![(String::from("q"), name.clone())],
        };
        params.push((String::from("format"), String::from("json")));
        params.push((String::from("limit"), String::from("1")));
        params
    }

    pub async fn resolve(&self, location: &Location) -> Result<BoundingBox, IngestError> {
        let failed = |reason: ResolutionFailure| IngestError::Resolution {
            location: location.label(),
            reason,
        };

        debug!(self.logger, "geocoding {}", location);
        let body = self
            .fetcher
            .fetch_text(&self.search_url, &Self::query_params(location))
            .await
            .map_err(|e| failed(e.into()))?;
        let bbox = parse_bounding_box(&body).map_err(failed)?;
        info!(self.logger, "resolved {} to {}", location, bbox);
        Ok(bbox)
    }
}

fn parse_bounding_box(body: &str) -> Result<BoundingBox, ResolutionFailure> {
    let candidates: Vec<Candidate> = serde_json::from_str(body)?;
    let candidate = candidates
        .into_iter()
        .next()
        .ok_or(ResolutionFailure::NoCandidates)?;
    let raw = candidate
        .boundingbox
        .ok_or(ResolutionFailure::MissingBoundingBox)?;

    let coords: Option<Vec<f64>> = raw.iter().map(coordinate).collect();
    match coords.as_deref() {
        Some(&[south_lat, north_lat, west_lon, east_lon]) => Ok(BoundingBox {
            south_lat,
            north_lat,
            west_lon,
            east_lon,
        }),
        _ => Err(ResolutionFailure::MalformedBoundingBox(
            raw.iter().map(|v| v.to_string()).collect(),
        )),
    }
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
