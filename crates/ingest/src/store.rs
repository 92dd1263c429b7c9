use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, Postgres, QueryBuilder,
};

use crate::{DbConfig, WeatherObservation};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Create the observation table and its indexes if they do not exist.
    /// Safe to call every run; never touches existing data.
    async fn ensure_schema(&self) -> Result<(), StorageError>;

    /// Idempotent batched upsert. Returns the number of rows applied;
    /// an empty batch returns 0 without doing any connection work.
    async fn write_batch(&self, records: &[WeatherObservation]) -> Result<u64, StorageError>;
}

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS weather_data (
  city_id        BIGINT,
  city_name      TEXT NOT NULL,
  country        TEXT,
  lat            DOUBLE PRECISION,
  lon            DOUBLE PRECISION,
  temperature_c  DOUBLE PRECISION,
  humidity_pct   INTEGER,
  pressure_hpa   INTEGER,
  wind_mps       DOUBLE PRECISION,
  clouds_pct     INTEGER,
  rain_1h_mm     DOUBLE PRECISION,
  rain_3h_mm     DOUBLE PRECISION,
  weather        TEXT,
  observed_at    TIMESTAMPTZ NOT NULL,
  fetched_at     TIMESTAMPTZ NOT NULL DEFAULT now()
)";

// The identity key is the remote city id when the API assigned one, else
// the city name. The expression index makes (identity, observed_at) unique
// even for rows with a NULL city_id.
const CREATE_IDENTITY_INDEX: &str = "\
CREATE UNIQUE INDEX IF NOT EXISTS weather_data_identity_idx \
ON weather_data ((COALESCE(city_id::text, city_name)), observed_at)";

// For time-range queries by downstream consumers
const CREATE_OBSERVED_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS weather_data_observed_idx ON weather_data (observed_at)";

// Measurement and descriptive fields are overwritten by a conflicting
// write; the key pair and fetched_at keep their original values.
const ON_CONFLICT_CLAUSE: &str = " ON CONFLICT ((COALESCE(city_id::text, city_name)), observed_at) \
DO UPDATE SET \
city_name = EXCLUDED.city_name, \
country = EXCLUDED.country, \
lat = EXCLUDED.lat, \
lon = EXCLUDED.lon, \
temperature_c = EXCLUDED.temperature_c, \
humidity_pct = EXCLUDED.humidity_pct, \
pressure_hpa = EXCLUDED.pressure_hpa, \
wind_mps = EXCLUDED.wind_mps, \
clouds_pct = EXCLUDED.clouds_pct, \
rain_1h_mm = EXCLUDED.rain_1h_mm, \
rain_3h_mm = EXCLUDED.rain_3h_mm, \
weather = EXCLUDED.weather";

/// Postgres-backed store. The pool is lazy and capped at a single
/// connection: a run is one sequential writer, schema setup then one
/// batched write.
pub struct PgStore {
    pool: PgPool,
    page_size: usize,
}

impl PgStore {
    pub fn new(config: &DbConfig, page_size: usize) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(options);

        Self { pool, page_size }
    }
}

#[async_trait]
impl ObservationStore for PgStore {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_IDENTITY_INDEX)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_OBSERVED_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn write_batch(&self, records: &[WeatherObservation]) -> Result<u64, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        // Pages bound the statement size; the transaction keeps the whole
        // run's write atomic for any later reader.
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for page in records.chunks(self.page_size) {
            let mut query = build_upsert(page);
            written += query.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(written)
    }
}

fn build_upsert(page: &[WeatherObservation]) -> QueryBuilder<'_, Postgres> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO weather_data (\
         city_id, city_name, country, lat, lon, \
         temperature_c, humidity_pct, pressure_hpa, wind_mps, clouds_pct, \
         rain_1h_mm, rain_3h_mm, weather, observed_at, fetched_at) ",
    );
    builder.push_values(page, |mut row, obs| {
        row.push_bind(obs.city_id)
            .push_bind(obs.city_name.as_str())
            .push_bind(obs.country.as_deref())
            .push_bind(obs.lat)
            .push_bind(obs.lon)
            .push_bind(obs.temperature_c)
            .push_bind(obs.humidity_pct)
            .push_bind(obs.pressure_hpa)
            .push_bind(obs.wind_mps)
            .push_bind(obs.clouds_pct)
            .push_bind(obs.rain_1h_mm)
            .push_bind(obs.rain_3h_mm)
            .push_bind(obs.weather.as_deref())
            .push_bind(obs.observed_at)
            .push_bind(obs.fetched_at);
    });
    builder.push(ON_CONFLICT_CLAUSE);
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn observation(name: &str) -> WeatherObservation {
        WeatherObservation {
            city_id: Some(1701668),
            city_name: name.to_string(),
            country: Some("PH".to_string()),
            lat: Some(14.6),
            lon: Some(120.98),
            temperature_c: Some(30.2),
            humidity_pct: Some(74),
            pressure_hpa: Some(1009),
            wind_mps: Some(4.6),
            clouds_pct: Some(75),
            rain_1h_mm: None,
            rain_3h_mm: None,
            weather: Some("broken clouds".to_string()),
            observed_at: datetime!(2024-06-01 12:00:00 UTC),
            fetched_at: datetime!(2024-06-01 12:00:05 UTC),
        }
    }

    #[test]
    fn upsert_statement_binds_every_column_per_row() {
        let rows = vec![observation("Manila"), observation("Cebu City")];
        let query = build_upsert(&rows);
        let sql = query.sql();

        assert!(sql.starts_with("INSERT INTO weather_data"));
        assert!(sql.contains("ON CONFLICT ((COALESCE(city_id::text, city_name)), observed_at)"));
        assert!(sql.contains("temperature_c = EXCLUDED.temperature_c"));
        // conflict target and fetched_at are never updated
        assert!(!sql.contains("observed_at = EXCLUDED"));
        assert!(!sql.contains("fetched_at = EXCLUDED"));
        // 15 placeholders per row
        assert_eq!(sql.matches('$').count(), 30);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op_without_any_connection() {
        // Lazy pool pointed at a closed port: any connection attempt fails,
        // so a passing write proves storage was never touched.
        let config = DbConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            name: "weatherdb".to_string(),
            user: "nobody".to_string(),
            password: String::new(),
        };
        let store = PgStore::new(&config, 50);

        let written = store.write_batch(&[]).await.unwrap();
        assert_eq!(written, 0);
    }
}
