//! Weather HTTP endpoints.
//!
//! - GET /api/weather/current
//! - GET /api/weather/forecast

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::db::models::{WeatherForecastEntry, WeatherObservation};
use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{dec_to_f64, opt_dec_to_f64};
use crate::ml::predictor::{hour_start, weather_description};
use crate::ml::PREDICTION_HORIZON;

#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentWeatherResponse {
    pub observed_at: DateTime<Utc>,
    /// Temperature in °C
    pub temperature: f64,
    /// Wind speed in km/h
    pub windspeed: f64,
    /// WMO weather interpretation code
    pub weather_code: i32,
    pub weather_description: String,
    pub source: String,
}

impl From<WeatherObservation> for CurrentWeatherResponse {
    fn from(o: WeatherObservation) -> Self {
        Self {
            observed_at: o.observed_at,
            temperature: dec_to_f64(o.temperature),
            windspeed: dec_to_f64(o.windspeed),
            weather_code: o.weather_code,
            weather_description: weather_description(o.weather_code).to_string(),
            source: o.source,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ForecastEntryResponse {
    pub time: DateTime<Utc>,
    pub temperature: f64,
    pub windspeed: f64,
    pub weather_code: i32,
    pub weather_description: String,
    /// Precipitation in mm; null when the source omitted it
    pub precipitation: Option<f64>,
    /// When this entry was last refreshed
    pub last_updated: DateTime<Utc>,
}

impl From<WeatherForecastEntry> for ForecastEntryResponse {
    fn from(f: WeatherForecastEntry) -> Self {
        Self {
            time: f.forecast_time,
            temperature: dec_to_f64(f.temperature),
            windspeed: dec_to_f64(f.windspeed),
            weather_code: f.weather_code,
            weather_description: weather_description(f.weather_code).to_string(),
            precipitation: opt_dec_to_f64(f.precipitation),
            last_updated: f.last_updated,
        }
    }
}

/// Latest weather observation.
#[utoipa::path(
    get,
    path = "/api/weather/current",
    tag = "Weather",
    responses(
        (status = 200, description = "Latest observation", body = CurrentWeatherResponse),
        (status = 404, description = "No observation recorded yet", body = ErrorResponse),
    )
)]
pub async fn get_current_weather(
    State(pool): State<PgPool>,
) -> Result<Json<CurrentWeatherResponse>, AppError> {
    let observation = queries::get_latest_observation(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("No weather observation recorded yet".into()))?;
    Ok(Json(observation.into()))
}

/// Hourly forecast from the current hour onwards.
#[utoipa::path(
    get,
    path = "/api/weather/forecast",
    tag = "Weather",
    responses(
        (status = 200, description = "Up to 48 upcoming forecast entries", body = Vec<ForecastEntryResponse>),
    )
)]
pub async fn get_weather_forecast(
    State(pool): State<PgPool>,
) -> Result<Json<Vec<ForecastEntryResponse>>, AppError> {
    let entries =
        queries::get_upcoming_forecasts(&pool, hour_start(Utc::now()), PREDICTION_HORIZON as i64)
            .await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
