//! Availability prediction endpoint.
//!
//! GET /api/predict?station_id=...

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::WeatherForecastEntry;
use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::dec_to_f64;
use crate::ml::predictor::{
    hour_start, predict_series, resolve_capacity, FallbackReason, ForecastInput, PredictionMode,
    PredictionPoint,
};
use crate::ml::{DataSource, DEFAULT_AVERAGE_CAPACITY, PREDICTION_HORIZON};
use crate::routes::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct PredictQuery {
    /// Station to scale predictions to. Omit for the network-wide reference
    /// station (capacity 30, no clipping).
    pub station_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PredictionResponse {
    /// "model" when the trained model produced the values, "fallback" otherwise
    pub mode: PredictionMode,
    /// Why the fallback curve was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub station_id: Option<String>,
    /// Capacity the predictions are scaled to
    pub station_capacity: i32,
    /// Training data behind the model; null in fallback mode
    pub data_source: Option<DataSource>,
    /// Up to 48 hourly entries, ascending by time
    pub predictions: Vec<PredictionPoint>,
}

impl From<&WeatherForecastEntry> for ForecastInput {
    fn from(f: &WeatherForecastEntry) -> Self {
        Self {
            time: f.forecast_time,
            temperature: dec_to_f64(f.temperature),
            windspeed: dec_to_f64(f.windspeed),
            weather_code: f.weather_code,
        }
    }
}

/// Predicted bikes available for the next 48 forecast hours.
///
/// Unknown stations are not an error: they are scaled to the default
/// capacity. Without a trained model or without forecast data a labelled
/// fallback series is returned.
#[utoipa::path(
    get,
    path = "/api/predict",
    tag = "Predictions",
    params(PredictQuery),
    responses(
        (status = 200, description = "Prediction series", body = PredictionResponse),
        (status = 500, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_predictions(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
) -> Result<Json<PredictionResponse>, AppError> {
    let now = Utc::now();
    let station_id = query
        .station_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let (capacity, clip) = match &station_id {
        Some(id) => {
            let latest = queries::get_latest_status(&state.pool, id).await?;
            if latest.is_none() {
                tracing::debug!("No status for station {}, using default capacity", id);
            }
            (resolve_capacity(latest.as_ref()), true)
        }
        None => (DEFAULT_AVERAGE_CAPACITY, false),
    };

    let forecasts: Vec<ForecastInput> =
        queries::get_upcoming_forecasts(&state.pool, hour_start(now), PREDICTION_HORIZON as i64)
            .await?
            .iter()
            .map(ForecastInput::from)
            .collect();

    let loaded = state.registry.current().await;
    let series = predict_series(
        loaded.as_ref().map(|m| &m.artifact),
        &forecasts,
        capacity,
        clip,
        now,
    );

    let data_source = match series.mode {
        PredictionMode::Model => loaded.as_ref().map(|m| m.artifact.data_source),
        PredictionMode::Fallback => None,
    };

    Ok(Json(PredictionResponse {
        mode: series.mode,
        fallback_reason: series.fallback_reason,
        station_id,
        station_capacity: capacity,
        data_source,
        predictions: series.points,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_forecast_entry_conversion() {
        let entry = WeatherForecastEntry {
            forecast_time: "2026-03-02T09:00:00Z".parse().unwrap(),
            temperature: Decimal::new(86, 1),
            windspeed: Decimal::new(155, 1),
            weather_code: 61,
            precipitation: Some(Decimal::new(4, 1)),
            last_updated: "2026-03-02T08:15:00Z".parse().unwrap(),
        };
        let input = ForecastInput::from(&entry);
        assert_eq!(input.time, entry.forecast_time);
        assert_eq!(input.temperature, 8.6);
        assert_eq!(input.windspeed, 15.5);
        assert_eq!(input.weather_code, 61);
    }

    #[test]
    fn test_fallback_response_shape() {
        let series = predict_series(None, &[], DEFAULT_AVERAGE_CAPACITY, false, Utc::now());
        let response = PredictionResponse {
            mode: series.mode,
            fallback_reason: series.fallback_reason,
            station_id: None,
            station_capacity: DEFAULT_AVERAGE_CAPACITY,
            data_source: None,
            predictions: series.points,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mode"], "fallback");
        assert_eq!(json["fallback_reason"], "model_unavailable");
        assert_eq!(json["predictions"].as_array().unwrap().len(), PREDICTION_HORIZON);
        assert!(json["predictions"][0]["weather_description"]
            .as_str()
            .unwrap()
            .starts_with("Simulated"));
    }
}
