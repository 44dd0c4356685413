//! Open-Meteo forecast client.
//!
//! One request returns both the current conditions and the hourly forecast
//! for a fixed point. Times are requested in UTC and come back without an
//! offset (`YYYY-MM-DDTHH:MM`).
//! See: https://open-meteo.com/en/docs

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::queries::{InsertObservationParams, UpsertForecastParams};
use crate::errors::AppError;
use crate::helpers::f64_to_decimal_1dp;

const OPEN_METEO_TIMEOUT_SECS: u64 = 10;
const HOURLY_FIELDS: &str = "temperature_2m,precipitation,weathercode,wind_speed_10m";
const OBSERVATION_SOURCE: &str = "open-meteo";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
}

/// Parsed result of one weather fetch.
#[derive(Debug, Clone, Default)]
pub struct WeatherSnapshot {
    pub current: Option<InsertObservationParams>,
    pub forecasts: Vec<UpsertForecastParams>,
}

// --- Open-Meteo JSON response types ---

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current_weather: Option<CurrentWeather>,
    hourly: Option<Hourly>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: Option<f64>,
    windspeed: Option<f64>,
    weathercode: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Hourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
    weathercode: Vec<Option<i32>>,
    wind_speed_10m: Vec<Option<f64>>,
}

impl OpenMeteoClient {
    pub fn new(
        user_agent: &str,
        base_url: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(OPEN_METEO_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            latitude,
            longitude,
        })
    }

    /// Fetch current conditions and the hourly forecast.
    ///
    /// The observation is stamped with `observed_at` (scrape time), not the
    /// model's own timestamp.
    pub async fn fetch(&self, observed_at: DateTime<Utc>) -> Result<WeatherSnapshot, AppError> {
        let lat = format!("{:.4}", self.latitude);
        let lon = format!("{:.4}", self.longitude);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", lat.as_str()),
                ("longitude", lon.as_str()),
                ("current_weather", "true"),
                ("hourly", HOURLY_FIELDS),
                ("timezone", "UTC"),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("Open-Meteo request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo returned HTTP {}",
                response.status()
            )));
        }

        let body: OpenMeteoResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Failed to parse Open-Meteo response: {}", e))
        })?;

        Ok(WeatherSnapshot {
            current: body
                .current_weather
                .and_then(|c| parse_current(c, observed_at)),
            forecasts: body.hourly.map(parse_hourly).unwrap_or_default(),
        })
    }
}

fn parse_current(current: CurrentWeather, observed_at: DateTime<Utc>) -> Option<InsertObservationParams> {
    let Some((temperature, windspeed)) = current
        .temperature
        .and_then(f64_to_decimal_1dp)
        .zip(current.windspeed.and_then(f64_to_decimal_1dp))
    else {
        tracing::debug!("Dropping current weather without finite temperature and wind");
        return None;
    };
    Some(InsertObservationParams {
        observed_at,
        temperature,
        windspeed,
        weather_code: current.weathercode?,
        source: OBSERVATION_SOURCE.to_string(),
    })
}

fn column(values: &[Option<f64>], i: usize) -> Option<Decimal> {
    values.get(i).copied().flatten().and_then(f64_to_decimal_1dp)
}

/// Zip the column arrays into rows. Entries with an unparsable time or a
/// missing temperature, wind speed or code are skipped.
fn parse_hourly(hourly: Hourly) -> Vec<UpsertForecastParams> {
    let mut rows = Vec::with_capacity(hourly.time.len());
    for (i, raw_time) in hourly.time.iter().enumerate() {
        let Ok(naive) = NaiveDateTime::parse_from_str(raw_time, TIME_FORMAT) else {
            tracing::debug!("Skipping forecast entry with bad time {:?}", raw_time);
            continue;
        };
        let (Some(temperature), Some(windspeed), Some(weather_code)) = (
            column(&hourly.temperature_2m, i),
            column(&hourly.wind_speed_10m, i),
            hourly.weathercode.get(i).copied().flatten(),
        ) else {
            tracing::debug!("Skipping incomplete forecast entry at {}", raw_time);
            continue;
        };
        rows.push(UpsertForecastParams {
            forecast_time: naive.and_utc(),
            temperature,
            windspeed,
            weather_code,
            precipitation: column(&hourly.precipitation, i),
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn observed_at() -> DateTime<Utc> {
        "2026-03-02T08:17:42Z".parse().unwrap()
    }

    fn body() -> serde_json::Value {
        serde_json::json!({
            "latitude": 48.86,
            "longitude": 2.3399997,
            "timezone": "UTC",
            "current_weather": {
                "time": "2026-03-02T08:15",
                "temperature": 7.84,
                "windspeed": 14.2,
                "winddirection": 240,
                "weathercode": 3
            },
            "hourly": {
                "time": ["2026-03-02T08:00", "2026-03-02T09:00", "garbage", "2026-03-02T11:00"],
                "temperature_2m": [7.8, 8.6, 9.0, null],
                "precipitation": [0.0, null, 0.2, 0.1],
                "weathercode": [3, 61, 61, 2],
                "wind_speed_10m": [14.0, 15.5, 16.0, 12.0]
            }
        })
    }

    #[tokio::test]
    async fn test_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("current_weather", "true"))
            .and(query_param("timezone", "UTC"))
            .and(query_param("latitude", "48.8566"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(
            "test-agent",
            &format!("{}/v1/forecast", server.uri()),
            48.8566,
            2.3522,
        )
        .unwrap();
        let snapshot = client.fetch(observed_at()).await.unwrap();

        let current = snapshot.current.unwrap();
        assert_eq!(current.observed_at, observed_at());
        assert_eq!(current.temperature, Decimal::new(78, 1));
        assert_eq!(current.windspeed, Decimal::new(142, 1));
        assert_eq!(current.weather_code, 3);
        assert_eq!(current.source, "open-meteo");

        // "garbage" time and the null temperature are dropped.
        assert_eq!(snapshot.forecasts.len(), 2);
        let f = &snapshot.forecasts[1];
        assert_eq!(
            f.forecast_time,
            "2026-03-02T09:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(f.weather_code, 61);
        assert_eq!(f.windspeed, Decimal::new(155, 1));
        assert_eq!(f.precipitation, None);
        assert_eq!(snapshot.forecasts[0].precipitation, Some(Decimal::new(0, 1)));
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new("test-agent", &server.uri(), 48.8566, 2.3522).unwrap();
        let err = client.fetch(observed_at()).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalServiceError(_)));
    }

    #[test]
    fn test_missing_sections() {
        let parsed: OpenMeteoResponse = serde_json::from_value(serde_json::json!({
            "current_weather": { "temperature": 5.0 },
            "hourly": { "time": ["2026-03-02T08:00"] }
        }))
        .unwrap();
        assert!(parse_current(parsed.current_weather.unwrap(), observed_at()).is_none());
        assert!(parse_hourly(parsed.hourly.unwrap()).is_empty());
    }

    #[test]
    fn test_non_finite_readings_drop_the_row() {
        let current = CurrentWeather {
            temperature: Some(f64::NAN),
            windspeed: Some(12.0),
            weathercode: Some(3),
        };
        assert!(parse_current(current, observed_at()).is_none());

        let hourly = Hourly {
            time: vec!["2026-03-02T08:00".to_string(), "2026-03-02T09:00".to_string()],
            temperature_2m: vec![Some(f64::INFINITY), Some(7.04)],
            precipitation: vec![Some(0.0), Some(f64::NAN)],
            weathercode: vec![Some(1), Some(2)],
            wind_speed_10m: vec![Some(10.0), Some(11.0)],
        };
        let rows = parse_hourly(hourly);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].temperature, Decimal::new(70, 1));
        assert_eq!(rows[0].precipitation, None);
    }
}
