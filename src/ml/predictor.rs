//! Per-station prediction series.
//!
//! The model predicts the global average bikes available. A station's series
//! is that value scaled by `capacity / DEFAULT_AVERAGE_CAPACITY`. Without a
//! model or without forecast data a fixed daily curve is served instead, and
//! the series says so.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::artifacts::ModelArtifact;
use super::features::FeatureVector;
use super::{
    DEFAULT_AVERAGE_CAPACITY, DEFAULT_TEMPERATURE, DEFAULT_WEATHER_CODE, DEFAULT_WINDSPEED,
    PREDICTION_HORIZON,
};
use crate::db::models::StatusRecord;

/// Prefix of every fallback row's weather description.
pub const SIMULATED_PREFIX: &str = "Simulated";

/// Fallback curve: off-peak level, rush-hour bump and bad-weather penalty.
const FALLBACK_BASE_BIKES: f64 = 15.0;
const FALLBACK_RUSH_HOUR_BONUS: f64 = 10.0;
const FALLBACK_PRECIPITATION_PENALTY: f64 = 10.0;
/// WMO codes above this are drizzle, rain, snow or storms.
const PRECIPITATION_CODE_THRESHOLD: i32 = 50;

/// One forecast entry as the predictor consumes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastInput {
    pub time: DateTime<Utc>,
    pub temperature: f64,
    pub windspeed: f64,
    pub weather_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PredictionPoint {
    pub time: DateTime<Utc>,
    /// Temperature in °C
    pub temp: f64,
    /// Wind speed in km/h
    pub wind: f64,
    pub weather_code: i32,
    pub weather_description: String,
    pub predicted_bikes: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMode {
    /// Values come from the trained model.
    Model,
    /// Values come from the built-in daily curve.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    ModelUnavailable,
    NoForecastData,
}

impl FallbackReason {
    fn description(self) -> String {
        match self {
            FallbackReason::ModelUnavailable => format!("{} (model unavailable)", SIMULATED_PREFIX),
            FallbackReason::NoForecastData => format!("{} (no forecast data)", SIMULATED_PREFIX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSeries {
    pub mode: PredictionMode,
    pub fallback_reason: Option<FallbackReason>,
    pub points: Vec<PredictionPoint>,
}

/// Station capacity from its latest status row.
///
/// Unknown stations and non-positive totals fall back to the reference
/// capacity the model was trained against.
pub fn resolve_capacity(latest: Option<&StatusRecord>) -> i32 {
    latest
        .map(|s| s.bikes_available.saturating_add(s.docks_available))
        .filter(|&c| c > 0)
        .unwrap_or(DEFAULT_AVERAGE_CAPACITY)
}

/// Scale a global-average prediction to `capacity`.
///
/// The result is rounded half away from zero, never negative, and at most
/// `capacity` when `clip` is set.
pub fn rescale(global: f64, capacity: i32, clip: bool) -> i32 {
    if !global.is_finite() {
        return 0;
    }
    let scaled = (global * capacity as f64 / DEFAULT_AVERAGE_CAPACITY as f64)
        .max(0.0)
        .round();
    let scaled = if scaled > i32::MAX as f64 {
        i32::MAX
    } else {
        scaled as i32
    };
    if clip {
        scaled.min(capacity.max(0))
    } else {
        scaled
    }
}

/// Start of the hour containing `t`.
pub fn hour_start(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Global-average bikes according to the fallback curve.
fn fallback_global(time: DateTime<Utc>, weather_code: i32) -> f64 {
    let hour = FeatureVector::at(time, DEFAULT_TEMPERATURE, DEFAULT_WINDSPEED, weather_code).hour;
    let mut bikes = FALLBACK_BASE_BIKES;
    if (7..=9).contains(&hour) || (17..=19).contains(&hour) {
        bikes += FALLBACK_RUSH_HOUR_BONUS;
    }
    if weather_code > PRECIPITATION_CODE_THRESHOLD {
        bikes -= FALLBACK_PRECIPITATION_PENALTY;
    }
    bikes
}

/// Build the prediction series for one station (or the reference station when
/// `clip` is false).
///
/// Forecasts before the current hour are ignored; at most
/// `PREDICTION_HORIZON` entries are used, ascending by time.
pub fn predict_series(
    model: Option<&ModelArtifact>,
    forecasts: &[ForecastInput],
    capacity: i32,
    clip: bool,
    now: DateTime<Utc>,
) -> PredictionSeries {
    let from = hour_start(now);
    let mut upcoming: Vec<ForecastInput> = forecasts
        .iter()
        .filter(|f| f.time >= from)
        .copied()
        .collect();
    upcoming.sort_by_key(|f| f.time);
    upcoming.truncate(PREDICTION_HORIZON);

    let model = match model {
        Some(m) if !upcoming.is_empty() => m,
        Some(_) => {
            return fallback_series(FallbackReason::NoForecastData, &[], capacity, clip, from)
        }
        None => {
            return fallback_series(
                FallbackReason::ModelUnavailable,
                &upcoming,
                capacity,
                clip,
                from,
            )
        }
    };

    let points = upcoming
        .iter()
        .map(|f| {
            let features = FeatureVector::at(f.time, f.temperature, f.windspeed, f.weather_code);
            PredictionPoint {
                time: f.time,
                temp: f.temperature,
                wind: f.windspeed,
                weather_code: f.weather_code,
                weather_description: weather_description(f.weather_code).to_string(),
                predicted_bikes: rescale(model.predict(&features), capacity, clip),
            }
        })
        .collect();

    PredictionSeries {
        mode: PredictionMode::Model,
        fallback_reason: None,
        points,
    }
}

fn fallback_series(
    reason: FallbackReason,
    forecasts: &[ForecastInput],
    capacity: i32,
    clip: bool,
    from: DateTime<Utc>,
) -> PredictionSeries {
    tracing::debug!("Serving fallback predictions: {:?}", reason);

    let inputs: Vec<ForecastInput> = if forecasts.is_empty() {
        (0..PREDICTION_HORIZON as i64)
            .map(|h| ForecastInput {
                time: from + Duration::hours(h),
                temperature: DEFAULT_TEMPERATURE,
                windspeed: DEFAULT_WINDSPEED,
                weather_code: DEFAULT_WEATHER_CODE,
            })
            .collect()
    } else {
        forecasts.to_vec()
    };

    let description = reason.description();
    let points = inputs
        .iter()
        .map(|f| PredictionPoint {
            time: f.time,
            temp: f.temperature,
            wind: f.windspeed,
            weather_code: f.weather_code,
            weather_description: description.clone(),
            predicted_bikes: rescale(fallback_global(f.time, f.weather_code), capacity, clip),
        })
        .collect();

    PredictionSeries {
        mode: PredictionMode::Fallback,
        fallback_reason: Some(reason),
        points,
    }
}

/// Human-readable WMO weather interpretation code.
pub fn weather_description(code: i32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 | 65 => "Rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 => "Snowfall",
        77 => "Snow grains",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}
