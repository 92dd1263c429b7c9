use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use slog::{debug, warn, Logger};
use tokio::sync::Mutex;

use crate::{LocationTarget, RateLimiter};

pub const OPENWEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Attempts per location, including the first one
pub const MAX_ATTEMPTS: u32 = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Current-conditions response as the API actually sends it: every group
/// and every field may be missing. Decoded field-by-field, never assumed
/// complete.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawObservationPayload {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub coord: Option<Coord>,
    pub sys: Option<Sys>,
    pub main: Option<MainGroup>,
    pub wind: Option<Wind>,
    pub clouds: Option<Clouds>,
    pub rain: Option<Rain>,
    #[serde(default)]
    pub weather: Vec<ConditionEntry>,
    /// Observation time, UTC seconds since epoch
    pub dt: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Coord {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sys {
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MainGroup {
    pub temp: Option<f64>,
    pub humidity: Option<i32>,
    pub pressure: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Wind {
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Clouds {
    pub all: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rain {
    #[serde(rename = "1h")]
    pub one_hour: Option<f64>,
    #[serde(rename = "3h")]
    pub three_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionEntry {
    pub description: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unparseable response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Transient conditions worth another attempt. Any other non-success
    /// status fails immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => {
                matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
            }
            // A garbled body from the API behaves like a transient
            // server-side problem
            FetchError::Decode(_) => true,
        }
    }
}

/// Delay before attempt `attempt + 1`, doubling each time from the
/// rate-limit interval.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WeatherFetch: Send + Sync {
    async fn fetch(&self, target: &LocationTarget) -> Result<RawObservationPayload, FetchError>;
}

/// One HTTP GET per location with bounded exponential backoff on retryable
/// failures. Holds the shared rate limiter so the minimum call spacing is
/// kept even between retries of the same location.
pub struct RetryingFetcher {
    logger: Logger,
    client: Client,
    api_key: String,
    base_url: String,
    base_delay: Duration,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl RetryingFetcher {
    pub fn new(
        logger: Logger,
        api_key: String,
        base_delay: Duration,
        rate_limiter: Arc<Mutex<RateLimiter>>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            logger,
            client,
            api_key,
            base_url: OPENWEATHER_URL.to_string(),
            base_delay,
            rate_limiter,
        })
    }

    async fn attempt(&self, target: &LocationTarget) -> Result<RawObservationPayload, FetchError> {
        self.rate_limiter.lock().await.wait_turn().await;

        debug!(self.logger, "requesting weather for {}", target.query);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", target.query.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl WeatherFetch for RetryingFetcher {
    async fn fetch(&self, target: &LocationTarget) -> Result<RawObservationPayload, FetchError> {
        retry_with_backoff(
            &self.logger,
            &target.name,
            self.base_delay,
            MAX_ATTEMPTS,
            || self.attempt(target),
        )
        .await
    }
}

/// Runs `attempt_fn` up to `max_attempts` times, sleeping
/// `base × 2^(n-1)` after the n-th retryable failure. Non-retryable errors
/// and the final failure propagate as-is.
async fn retry_with_backoff<T, F, Fut>(
    logger: &Logger,
    label: &str,
    base_delay: Duration,
    max_attempts: u32,
    mut attempt_fn: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(base_delay, attempt);
                warn!(
                    logger,
                    "retry {}/{} for {} after error: {}; sleeping {:.1}s",
                    attempt,
                    max_attempts,
                    label,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
