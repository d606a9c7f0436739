use std::path::PathBuf;

use crate::{TransportError, WarehouseError};

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("failed to resolve location '{location}': {reason}")]
    Resolution {
        location: String,
        #[source]
        reason: ResolutionFailure,
    },
    #[error("failed to fetch {what} from weather provider: {reason}")]
    Fetch {
        what: &'static str,
        #[source]
        reason: FetchFailure,
    },
    #[error("failed to normalize provider response: {0}")]
    Normalization(#[from] NormalizationError),
    #[error("failed to write batch file {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("warehouse {step} step failed: {source}")]
    Load {
        step: LoadStep,
        #[source]
        source: WarehouseError,
    },
    #[error("failed to connect to warehouse: {0}")]
    Connect(#[source] WarehouseError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolutionFailure {
    #[error("geocoder returned no candidates")]
    NoCandidates,
    #[error("candidate has no bounding box")]
    MissingBoundingBox,
    #[error("malformed bounding box {0:?}")]
    MalformedBoundingBox(Vec<String>),
    #[error("geocoding request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("undecodable geocoding response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum FetchFailure {
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("undecodable response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("expected {expected} point responses, got {found}")]
    PointCountMismatch { expected: usize, found: usize },
    #[error("point response at index {0} has no hourly block")]
    MissingHourly(usize),
    #[error("point response at index {index} has a malformed time axis: {reason}")]
    MalformedTimeAxis { index: usize, reason: &'static str },
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum NormalizationError {
    #[error(
        "variable {variable} at ({latitude}, {longitude}) has {found} values for {expected} timestamps"
    )]
    LengthMismatch {
        latitude: f64,
        longitude: f64,
        variable: &'static str,
        expected: u64,
        found: usize,
    },
    #[error("non-positive interval {interval}s at ({latitude}, {longitude})")]
    InvalidInterval {
        latitude: f64,
        longitude: f64,
        interval: i64,
    },
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Stage,
    Copy,
}

impl std::fmt::Display for LoadStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStep::Stage => f.write_str("stage"),
            LoadStep::Copy => f.write_str("copy"),
        }
    }
}
