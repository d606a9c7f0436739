use time::format_description::well_known::Rfc3339;

use crate::{BoundingBox, IngestError, Mode, PointTable};

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct LocationSummary {
    pub bbox: BoundingBox,
    pub grid_points: usize,
    pub records: usize,
    pub file_name: String,
    pub loaded: bool,
}

#[derive(Debug)]
pub struct LocationOutcome {
    pub location: String,
    pub result: Result<LocationSummary, IngestError>,
}

impl LocationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// One line for the end-of-run summary
    pub fn summary_line(&self) -> String {
        match &self.result {
            Ok(summary) if summary.loaded => format!(
                "{}: {} records from {} grid points loaded ({})",
                self.location, summary.records, summary.grid_points, summary.file_name
            ),
            Ok(summary) => format!(
                "{}: {} records from {} grid points written, not loaded (dry run)",
                self.location, summary.records, summary.grid_points
            ),
            Err(e) => format!("{}: FAILED: {}", self.location, e),
        }
    }
}

/// Per-location results of one run, in processing order
#[derive(Debug)]
pub struct RunReport {
    pub mode: Mode,
    pub outcomes: Vec<LocationOutcome>,
}

impl RunReport {
    pub fn new(mode: Mode) -> Self {
        RunReport {
            mode,
            outcomes: vec![],
        }
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures() > 0
    }

    pub fn records_loaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .filter(|s| s.loaded)
            .map(|s| s.records)
            .sum()
    }
}

pub fn render_location_header(label: &str, mode: Mode, bbox: &BoundingBox, points: usize) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    format!(
        "{rule}\n{label} ({mode})\nBounding box: {bbox}\nGrid points: {points}\n{rule}",
    )
}

/// Fixed-width table of one point's hourly records; missing values print as `-`
pub fn render_point_table(table: &PointTable) -> String {
    let mut lines = vec![
        format!(
            "Point ({}, {}): {} records",
            table.latitude,
            table.longitude,
            table.records.len()
        ),
        format!(
            "{:<22}{:>16}{:>8}{:>27}{:>15}",
            "timestamp", "temperature_2m", "is_day", "precipitation_probability", "precipitation"
        ),
    ];
    lines.extend(table.records.iter().map(|record| {
        let timestamp = record
            .timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| record.timestamp.unix_timestamp().to_string());
        format!(
            "{:<22}{:>16}{:>8}{:>27}{:>15}",
            timestamp,
            cell(record.temperature_2m),
            cell(record.is_day),
            cell(record.precipitation_probability),
            cell(record.precipitation)
        )
    }));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| String::from("-"), |v| v.to_string())
}
