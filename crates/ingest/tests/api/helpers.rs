use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};
use slog::{o, Discard, Logger};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use weather_ingest::{
    Fetcher, Location, Mode, PipelineSettings, TransportError, WarehouseConnection,
    WarehouseConnector, WarehouseError,
};

mock! {
    pub HttpSource {}
    #[async_trait]
    impl Fetcher for HttpSource {
        async fn fetch_text(&self, url: &str, query: &[(String, String)]) -> Result<String, TransportError>;
    }
}

mock! {
    pub Connector {}
    #[async_trait]
    impl WarehouseConnector for Connector {
        async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError>;
    }
}

pub fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

pub fn settings(mode: Mode, locations: Vec<Location>, output_dir: &Path) -> PipelineSettings {
    PipelineSettings {
        output_dir: output_dir.to_path_buf(),
        ..PipelineSettings::new(mode, locations)
    }
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

/// Nominatim answer for Atlanta; a location named "Nowhere" geocodes to nothing
pub fn geocode_body(query: &[(String, String)]) -> String {
    let unknown = query
        .iter()
        .any(|(key, value)| (key == "city" || key == "q") && value == "Nowhere");
    if unknown {
        return String::from("[]");
    }
    json!([{
        "place_id": 298_532_917,
        "display_name": "Atlanta, Fulton County, Georgia, United States",
        "boundingbox": ["33.6478079", "33.8868950", "-84.5518189", "-84.2895526"]
    }])
    .to_string()
}

pub fn grid_body(cells: &[(f64, f64)]) -> String {
    let cells: Vec<Value> = cells
        .iter()
        .map(|(lat, lon)| json!({"latitude": lat, "longitude": lon, "generationtime_ms": 0.02}))
        .collect();
    Value::Array(cells).to_string()
}

pub fn current_hour() -> i64 {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    now - now.rem_euclid(3600)
}

/// Hourly series shaped the way the provider returns them for the requested window
pub fn weather_body(cells: &[(f64, f64)], mode: Mode, short_temperature: bool) -> String {
    let (start, hours) = match mode {
        Mode::History => (current_hour() - 24 * 3600, 24),
        Mode::Forecast => (current_hour() + 3600, 1),
    };
    let points: Vec<Value> = cells
        .iter()
        .map(|(lat, lon)| {
            let time: Vec<i64> = (0..hours).map(|h| start + h * 3600).collect();
            let mut temperature: Vec<f64> = (0..hours).map(|h| 70.0 + h as f64 * 0.5).collect();
            if short_temperature {
                temperature.pop();
            }
            json!({
                "latitude": lat,
                "longitude": lon,
                "utc_offset_seconds": 0,
                "hourly": {
                    "time": time,
                    "temperature_2m": temperature,
                    "is_day": (0..hours).map(|h| i64::from((7..20).contains(&(h % 24)))).collect::<Vec<_>>(),
                    "precipitation_probability": vec![10; hours as usize],
                    "precipitation": vec![0.0; hours as usize],
                }
            })
        })
        .collect();
    Value::Array(points).to_string()
}

/// Mock provider serving geocoder, grid and hourly requests
pub struct Provider {
    pub cells: Vec<(f64, f64)>,
    pub mode: Mode,
    pub short_temperature: bool,
}

impl Provider {
    pub fn new(mode: Mode) -> Self {
        Provider {
            cells: vec![(33.75, -84.375), (33.875, -84.5)],
            mode,
            short_temperature: false,
        }
    }

    pub fn respond(&self, url: &str, query: &[(String, String)]) -> String {
        if url.contains("nominatim") {
            geocode_body(query)
        } else if query.iter().any(|(key, _)| key == "bounding_box") {
            grid_body(&self.cells)
        } else {
            weather_body(&self.cells, self.mode, self.short_temperature)
        }
    }

    pub fn into_fetcher(self) -> MockHttpSource {
        let mut fetcher = MockHttpSource::new();
        fetcher
            .expect_fetch_text()
            .returning(move |url, query| Ok(self.respond(url, query)));
        fetcher
    }
}

#[derive(Default)]
pub struct Recording {
    pub statements: Mutex<Vec<String>>,
    /// Contents of each batch file at the moment it was staged
    pub staged: Mutex<Vec<Vec<String>>>,
    pub closes: AtomicUsize,
    pub fail_on: Option<&'static str>,
}

/// Warehouse connection that records statements instead of running them
#[derive(Clone, Default)]
pub struct RecordingConnection {
    pub recording: Arc<Recording>,
}

impl RecordingConnection {
    pub fn failing_on(prefix: &'static str) -> Self {
        RecordingConnection {
            recording: Arc::new(Recording {
                fail_on: Some(prefix),
                ..Recording::default()
            }),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.recording.statements.lock().unwrap().clone()
    }

    pub fn staged(&self) -> Vec<Vec<String>> {
        self.recording.staged.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.recording.closes.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> MockConnector {
        let connection = self.clone();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move || Ok(Box::new(connection.clone()) as Box<dyn WarehouseConnection>));
        connector
    }
}

fn staged_path(statement: &str) -> Option<&str> {
    let rest = statement.strip_prefix("PUT 'file://")?;
    rest.split_once("' @%").map(|(path, _)| path)
}

#[async_trait]
impl WarehouseConnection for RecordingConnection {
    async fn execute(&self, statement: &str) -> Result<(), WarehouseError> {
        self.recording
            .statements
            .lock()
            .unwrap()
            .push(statement.to_string());

        if let Some(path) = staged_path(statement) {
            let lines = std::fs::read_to_string(path)?
                .lines()
                .map(String::from)
                .collect();
            self.recording.staged.lock().unwrap().push(lines);
        }

        match self.recording.fail_on {
            Some(prefix) if statement.starts_with(prefix) => Err(WarehouseError::Rejected {
                code: String::from("100080"),
                message: String::from("Number of columns in file does not match"),
            }),
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), WarehouseError> {
        self.recording.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
