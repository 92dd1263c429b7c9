use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::Path;

use serde::Deserialize;
use slog::{debug, info, warn, Logger};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{ObservationStore, StorageError, WeatherObservation};

#[derive(thiserror::Error, Debug)]
pub enum CsvImportError {
    #[error("failed to open csv file: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One line of a previously-exported observation dump. Header names match
/// the table columns; `datetime`/`timestamp` are accepted for `observed_at`
/// and `city` for `city_name`, covering older exports.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvRow {
    city_id: Option<i64>,
    #[serde(alias = "city")]
    city_name: Option<String>,
    country: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    temperature_c: Option<f64>,
    humidity_pct: Option<i32>,
    pressure_hpa: Option<i32>,
    wind_mps: Option<f64>,
    clouds_pct: Option<i32>,
    rain_1h_mm: Option<f64>,
    rain_3h_mm: Option<f64>,
    weather: Option<String>,
    #[serde(alias = "datetime", alias = "timestamp")]
    observed_at: Option<String>,
}

/// Loads a CSV export into the store through the same idempotent upsert the
/// live pipeline uses. Returns the number of rows applied; an empty or
/// fully-skipped file is a clean no-op.
pub async fn import_csv(
    logger: &Logger,
    store: &dyn ObservationStore,
    path: &Path,
) -> Result<u64, CsvImportError> {
    let file = File::open(path)?;
    let records = parse_csv_records(logger, file);

    if records.is_empty() {
        info!(logger, "no records to load from {}", path.display());
        return Ok(0);
    }

    store.ensure_schema().await?;
    let written = store.write_batch(&records).await?;
    Ok(written)
}

/// Reads rows leniently: a row without an identity or a parseable
/// timestamp is skipped, and within-batch duplicates on the identity key
/// are collapsed to the first occurrence to reduce ON CONFLICT churn.
fn parse_csv_records<R: io::Read>(logger: &Logger, reader: R) -> Vec<WeatherObservation> {
    let now = OffsetDateTime::now_utc();
    let mut csv_reader = csv::Reader::from_reader(reader);

    let mut seen: HashSet<(String, OffsetDateTime)> = HashSet::new();
    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut duplicates = 0usize;

    for (index, result) in csv_reader.deserialize::<CsvRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                debug!(logger, "row {}: unreadable: {}", index + 1, err);
                skipped += 1;
                continue;
            }
        };

        let Some(city_name) = row.city_name.filter(|name| !name.is_empty()) else {
            skipped += 1;
            continue;
        };
        let Some(observed_at) = row
            .observed_at
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        else {
            skipped += 1;
            continue;
        };

        let identity = row
            .city_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| city_name.clone());
        if !seen.insert((identity, observed_at)) {
            duplicates += 1;
            continue;
        }

        records.push(WeatherObservation {
            city_id: row.city_id,
            city_name,
            country: row.country,
            lat: row.lat,
            lon: row.lon,
            temperature_c: row.temperature_c,
            humidity_pct: row.humidity_pct,
            pressure_hpa: row.pressure_hpa,
            wind_mps: row.wind_mps,
            clouds_pct: row.clouds_pct,
            rain_1h_mm: row.rain_1h_mm,
            rain_3h_mm: row.rain_3h_mm,
            weather: row.weather,
            observed_at,
            fetched_at: now,
        });
    }

    if skipped > 0 || duplicates > 0 {
        warn!(
            logger,
            "parsed {} rows, skipped {} unusable, dropped {} in-batch duplicates",
            records.len(),
            skipped,
            duplicates
        );
    }
    records
}
