use time::OffsetDateTime;

use crate::RawObservationPayload;

/// The canonical record, one row in `weather_data`. Every measurement is
/// independently nullable; a partial payload still makes a valid row.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub city_id: Option<i64>,
    pub city_name: String,
    pub country: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<i32>,
    pub pressure_hpa: Option<i32>,
    pub wind_mps: Option<f64>,
    pub clouds_pct: Option<i32>,
    pub rain_1h_mm: Option<f64>,
    pub rain_3h_mm: Option<f64>,
    pub weather: Option<String>,
    pub observed_at: OffsetDateTime,
    pub fetched_at: OffsetDateTime,
}

#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("epoch timestamp {0} out of range: {1}")]
    Timestamp(i64, #[source] time::error::ComponentRange),
}

/// Maps a raw payload onto the canonical record. Pure except for reading
/// the clock, which happens here and nowhere else in the per-location path.
pub fn normalize(
    payload: &RawObservationPayload,
    fallback_name: &str,
) -> Result<WeatherObservation, NormalizeError> {
    normalize_at(payload, fallback_name, OffsetDateTime::now_utc())
}

fn normalize_at(
    payload: &RawObservationPayload,
    fallback_name: &str,
    now: OffsetDateTime,
) -> Result<WeatherObservation, NormalizeError> {
    // The API's `dt` is the authoritative observation moment; without it
    // the collection time stands in. Stored history depends on this
    // fallback, so it stays exactly as-is.
    let observed_at = match payload.dt {
        Some(epoch) => OffsetDateTime::from_unix_timestamp(epoch)
            .map_err(|e| NormalizeError::Timestamp(epoch, e))?,
        None => now,
    };

    Ok(WeatherObservation {
        city_id: payload.id,
        city_name: payload
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback_name.to_string()),
        country: payload.sys.as_ref().and_then(|s| s.country.clone()),
        lat: payload.coord.as_ref().and_then(|c| c.lat),
        lon: payload.coord.as_ref().and_then(|c| c.lon),
        temperature_c: payload.main.as_ref().and_then(|m| m.temp),
        humidity_pct: payload.main.as_ref().and_then(|m| m.humidity),
        pressure_hpa: payload.main.as_ref().and_then(|m| m.pressure),
        wind_mps: payload.wind.as_ref().and_then(|w| w.speed),
        clouds_pct: payload.clouds.as_ref().and_then(|c| c.all),
        rain_1h_mm: payload.rain.as_ref().and_then(|r| r.one_hour),
        rain_3h_mm: payload.rain.as_ref().and_then(|r| r.three_hours),
        weather: payload.weather.first().and_then(|w| w.description.clone()),
        observed_at,
        fetched_at: now,
    })
}
