use slog::{info, warn, Logger};
use time::format_description::well_known::Rfc3339;

use crate::{
    normalize, FetchError, LocationTarget, NormalizeError, ObservationStore, StorageError,
    WeatherFetch, WeatherObservation,
};

/// Terminal summary of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Rows applied by the batched write
    pub written: u64,
    /// Locations configured for the run
    pub total: usize,
}

#[derive(thiserror::Error, Debug)]
enum LocationError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// One complete pass: ensure schema, then rate-limit → fetch → normalize
/// per location, then a single batched upsert of everything collected.
///
/// A location that fails is logged and skipped; the rest of the list is
/// still attempted. Schema and write failures abort the run. There is no
/// checkpoint: a re-invocation is a fresh, independent attempt.
pub async fn run_once(
    logger: &Logger,
    fetcher: &dyn WeatherFetch,
    store: &dyn ObservationStore,
    locations: &[LocationTarget],
) -> Result<IngestReport, StorageError> {
    store.ensure_schema().await?;

    let mut collected: Vec<WeatherObservation> = Vec::with_capacity(locations.len());
    for target in locations {
        match collect_one(fetcher, target).await {
            Ok(obs) => {
                info!(
                    logger,
                    "{} ({}) @ {} temp={:?}C hum={:?}% wind={:?}m/s",
                    obs.city_name,
                    obs.country.as_deref().unwrap_or("??"),
                    obs.observed_at.format(&Rfc3339).unwrap_or_default(),
                    obs.temperature_c,
                    obs.humidity_pct,
                    obs.wind_mps
                );
                collected.push(obs);
            }
            Err(err) => {
                warn!(logger, "skipping {} ({}): {}", target.name, target.query, err);
            }
        }
    }

    let written = if collected.is_empty() {
        info!(logger, "nothing collected, leaving the store untouched");
        0
    } else {
        store.write_batch(&collected).await?
    };

    info!(logger, "done, upserted rows: {}/{}", written, locations.len());
    Ok(IngestReport {
        written,
        total: locations.len(),
    })
}

async fn collect_one(
    fetcher: &dyn WeatherFetch,
    target: &LocationTarget,
) -> Result<WeatherObservation, LocationError> {
    let payload = fetcher.fetch(target).await?;
    Ok(normalize(&payload, &target.name)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockObservationStore, MockWeatherFetch, RawObservationPayload};
    use reqwest::StatusCode;
    use slog::o;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn targets(names: &[&str]) -> Vec<LocationTarget> {
        names
            .iter()
            .map(|name| LocationTarget::new(name, &format!("{},PH", name)))
            .collect()
    }

    fn payload_named(name: &str) -> RawObservationPayload {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "main": {"temp": 28.0, "humidity": 80, "pressure": 1010},
            "dt": 1_700_000_000
        }))
        .unwrap()
    }

    fn not_found() -> FetchError {
        FetchError::Status {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn one_bad_location_does_not_abort_the_rest() {
        let locations = targets(&["Manila", "Nowhere", "Cebu City"]);

        let mut fetcher = MockWeatherFetch::new();
        fetcher.expect_fetch().times(3).returning(|target| {
            if target.name == "Nowhere" {
                Err(not_found())
            } else {
                Ok(payload_named(&target.name))
            }
        });

        let mut store = MockObservationStore::new();
        store.expect_ensure_schema().times(1).returning(|| Ok(()));
        store
            .expect_write_batch()
            .times(1)
            .withf(|records| {
                records.len() == 2
                    && records[0].city_name == "Manila"
                    && records[1].city_name == "Cebu City"
            })
            .returning(|records| Ok(records.len() as u64));

        let report = run_once(&test_logger(), &fetcher, &store, &locations)
            .await
            .unwrap();
        assert_eq!(report, IngestReport { written: 2, total: 3 });
    }

    #[tokio::test]
    async fn all_failed_run_never_touches_the_writer() {
        let locations = targets(&["Manila", "Cebu City"]);

        let mut fetcher = MockWeatherFetch::new();
        fetcher.expect_fetch().times(2).returning(|_| Err(not_found()));

        let mut store = MockObservationStore::new();
        store.expect_ensure_schema().times(1).returning(|| Ok(()));
        store.expect_write_batch().times(0);

        let report = run_once(&test_logger(), &fetcher, &store, &locations)
            .await
            .unwrap();
        assert_eq!(report, IngestReport { written: 0, total: 2 });
    }

    #[tokio::test]
    async fn schema_failure_aborts_before_any_fetch() {
        let locations = targets(&["Manila"]);

        let mut fetcher = MockWeatherFetch::new();
        fetcher.expect_fetch().times(0);

        let mut store = MockObservationStore::new();
        store
            .expect_ensure_schema()
            .times(1)
            .returning(|| Err(StorageError::Database(sqlx::Error::PoolTimedOut)));

        let result = run_once(&test_logger(), &fetcher, &store, &locations).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn write_failure_fails_the_run_after_all_fetches() {
        let locations = targets(&["Manila", "Cebu City"]);

        let mut fetcher = MockWeatherFetch::new();
        fetcher
            .expect_fetch()
            .times(2)
            .returning(|target| Ok(payload_named(&target.name)));

        let mut store = MockObservationStore::new();
        store.expect_ensure_schema().times(1).returning(|| Ok(()));
        store
            .expect_write_batch()
            .times(1)
            .returning(|_| Err(StorageError::Database(sqlx::Error::PoolTimedOut)));

        let result = run_once(&test_logger(), &fetcher, &store, &locations).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unparseable_timestamp_is_skipped_like_a_fetch_failure() {
        let locations = targets(&["Manila", "Cebu City"]);

        let mut fetcher = MockWeatherFetch::new();
        fetcher.expect_fetch().times(2).returning(|target| {
            if target.name == "Manila" {
                let mut payload = payload_named("Manila");
                payload.dt = Some(i64::MAX);
                Ok(payload)
            } else {
                Ok(payload_named(&target.name))
            }
        });

        let mut store = MockObservationStore::new();
        store.expect_ensure_schema().times(1).returning(|| Ok(()));
        store
            .expect_write_batch()
            .times(1)
            .withf(|records| records.len() == 1 && records[0].city_name == "Cebu City")
            .returning(|records| Ok(records.len() as u64));

        let report = run_once(&test_logger(), &fetcher, &store, &locations)
            .await
            .unwrap();
        assert_eq!(report, IngestReport { written: 1, total: 2 });
    }
}
