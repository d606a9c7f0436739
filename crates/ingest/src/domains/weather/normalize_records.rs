use time::OffsetDateTime;

use crate::{
    IngestionBatch, Mode, NormalizationError, PointTable, RawPointResponse, WeatherRecord,
};

/// Flatten every point response of a location into one batch, failing on the first bad point
pub fn normalize_batch(
    responses: &[RawPointResponse],
    location: &str,
    mode: Mode,
) -> Result<IngestionBatch, NormalizationError> {
    let tables = responses
        .iter()
        .map(|response| normalize_point(response, location, mode))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(IngestionBatch {
        location: location.to_string(),
        mode,
        tables,
    })
}

/// One record per timestamp of the half-open window [start, end)
pub fn normalize_point(
    response: &RawPointResponse,
    location: &str,
    mode: Mode,
) -> Result<PointTable, NormalizationError> {
    let hourly = &response.hourly;
    if hourly.interval <= 0 {
        return Err(NormalizationError::InvalidInterval {
            latitude: response.latitude,
            longitude: response.longitude,
            interval: hourly.interval,
        });
    }

    let expected = window_len(hourly.start, hourly.end, hourly.interval);
    let variables: [(&'static str, usize); 4] = [
        ("temperature_2m", hourly.temperature_2m.len()),
        ("is_day", hourly.is_day.len()),
        ("precipitation_probability", hourly.precipitation_probability.len()),
        ("precipitation", hourly.precipitation.len()),
    ];
    if let Some((variable, found)) = variables
        .into_iter()
        .find(|(_, len)| Some(*len as u64) != expected)
    {
        return Err(NormalizationError::LengthMismatch {
            latitude: response.latitude,
            longitude: response.longitude,
            variable,
            expected: expected.unwrap_or(u64::MAX),
            found,
        });
    }

    let timestamps = (hourly.start..hourly.end)
        .step_by(hourly.interval as usize)
        .map(|t| {
            OffsetDateTime::from_unix_timestamp(t)
                .map_err(|_| NormalizationError::InvalidTimestamp(t))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let records = timestamps
        .into_iter()
        .enumerate()
        .map(|(i, timestamp)| WeatherRecord {
            timestamp,
            location: location.to_string(),
            latitude: response.latitude,
            longitude: response.longitude,
            temperature_2m: hourly.temperature_2m[i],
            is_day: hourly.is_day[i].map(|flag| u8::from(flag != 0.0)),
            precipitation_probability: hourly.precipitation_probability[i],
            precipitation: hourly.precipitation[i],
            mode,
        })
        .collect();

    Ok(PointTable {
        latitude: response.latitude,
        longitude: response.longitude,
        records,
    })
}

/// Number of steps in [start, end), checked before anything is allocated for the window
fn window_len(start: i64, end: i64, interval: i64) -> Option<u64> {
    if end <= start {
        return Some(0);
    }
    let span = u64::try_from(i128::from(end) - i128::from(start)).ok()?;
    let interval = u64::try_from(interval).ok()?;
    Some(span.div_ceil(interval))
}
