use serde::{Deserialize, Serialize};
use slog::{debug, info, warn, Logger};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};
use weather_ingest_core::{create_dir_all, remove_if_exists};

use crate::{IngestError, IngestionBatch, Mode, WeatherRecord};

/// One line of the batch file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRow {
    pub timestamp: String,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_2m: Option<f64>,
    pub is_day: Option<u8>,
    pub precipitation_probability: Option<f64>,
    pub precipitation: Option<f64>,
    pub mode: Mode,
}

impl TryFrom<&WeatherRecord> for WeatherRow {
    type Error = time::error::Format;
    fn try_from(val: &WeatherRecord) -> Result<Self, Self::Error> {
        Ok(WeatherRow {
            timestamp: val.timestamp.format(&Rfc3339)?,
            location: val.location.clone(),
            latitude: val.latitude,
            longitude: val.longitude,
            temperature_2m: val.temperature_2m,
            is_day: val.is_day,
            precipitation_probability: val.precipitation_probability,
            precipitation: val.precipitation,
            mode: val.mode,
        })
    }
}

/// `Atlanta, Georgia` + history at 2024-08-12 13:05:09 UTC -> `Atlanta_Georgia_history_20240812_130509.json`
pub fn batch_file_name(label: &str, mode: Mode, at: OffsetDateTime) -> String {
    let safe_label = label.replace(' ', "_").replace(',', "");
    let stamp_format = format_description!("[year][month][day]_[hour][minute][second]");
    let stamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(stamp_format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("{}_{}_{}.json", safe_label, mode, stamp)
}

/// A written batch file, removed from disk when dropped unless kept
pub struct BatchFile {
    logger: Logger,
    path: PathBuf,
    keep: bool,
}

impl BatchFile {
    fn new(logger: Logger, path: PathBuf) -> Self {
        BatchFile {
            logger,
            path,
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Leave the file on disk and hand back its path
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }

    /// Remove the file now, surfacing any error instead of logging it
    pub fn remove(mut self) -> io::Result<()> {
        self.keep = true;
        remove_if_exists(&self.path).map(|_| ())
    }
}

impl Drop for BatchFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match remove_if_exists(&self.path) {
            Ok(true) => debug!(self.logger, "removed batch file {}", self.path.display()),
            Ok(false) => {}
            Err(e) => warn!(
                self.logger,
                "failed to remove batch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Write the batch as line-delimited JSON into `dir`
pub fn write_batch(
    logger: &Logger,
    batch: &IngestionBatch,
    dir: &Path,
    at: OffsetDateTime,
) -> Result<BatchFile, IngestError> {
    let path = dir.join(batch_file_name(&batch.location, batch.mode, at));
    let failed = |source: io::Error| IngestError::Serialization {
        path: path.clone(),
        source,
    };

    create_dir_all(dir).map_err(failed)?;
    let file = File::create(&path).map_err(failed)?;
    // guard first so a partial file is cleaned up on error
    let guard = BatchFile::new(logger.clone(), path.clone());

    let mut writer = BufWriter::new(file);
    for record in batch.records() {
        let row = WeatherRow::try_from(record)
            .map_err(|e| failed(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        serde_json::to_writer(&mut writer, &row).map_err(|e| failed(e.into()))?;
        writer.write_all(b"\n").map_err(failed)?;
    }
    writer.flush().map_err(failed)?;

    info!(
        logger,
        "wrote {} records to {}",
        batch.record_count(),
        path.display()
    );
    Ok(guard)
}
