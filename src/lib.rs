//! Velib availability ingestion, monitoring and forecasting.
//!
//! The `velib-forecast-api` binary runs the HTTP API together with the
//! station and weather pollers; `velib-trainer` fits the availability model
//! from the collected history and writes it to `MODEL_DIR`.

pub mod config;
pub mod db;
pub mod errors;
pub(crate) mod helpers;
pub mod ml;
pub mod routes;
pub mod services;

use axum::routing::{get, post};
use axum::Router;
use utoipa::OpenApi;

use routes::AppState;

/// OpenAPI document for the Velib forecast API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Velib Forecast API",
        version = "0.1.0",
        description = "Bike-share availability API for Velib Métropole. \
            Collects station status and weather on a schedule, serves map, \
            history and monitoring views, and predicts per-station bike \
            availability for the next 48 hours from a model trained on the \
            collected history.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Stations", description = "Station map, search and history"),
        (name = "Predictions", description = "Availability predictions"),
        (name = "Weather", description = "Current weather and forecast"),
        (name = "Model", description = "Served model metrics"),
        (name = "Monitoring", description = "Ingestion monitoring"),
        (name = "Poller", description = "Background poller status"),
    ),
    paths(
        routes::health::health_check,
        routes::stations::get_map_data,
        routes::stations::get_nearest_stations,
        routes::stations::get_station_chart,
        routes::stations::post_hourly_stats,
        routes::predictions::get_predictions,
        routes::weather::get_current_weather,
        routes::weather::get_weather_forecast,
        routes::model::get_model_metrics,
        routes::monitoring::get_monitoring,
        routes::poller::get_poller_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::stations::StationView,
            routes::stations::NearestStation,
            routes::stations::StationChartResponse,
            routes::stations::HourlyPoint,
            routes::stations::HourlyStatsRequest,
            routes::stations::HourlyStatsResponse,
            routes::predictions::PredictionResponse,
            ml::predictor::PredictionPoint,
            ml::predictor::PredictionMode,
            ml::predictor::FallbackReason,
            ml::DataSource,
            ml::Metrics,
            routes::weather::CurrentWeatherResponse,
            routes::weather::ForecastEntryResponse,
            routes::model::ModelMetricsResponse,
            routes::monitoring::MonitoringResponse,
            services::poller::PollerState,
            services::poller::LoopStatus,
            errors::ErrorResponse,
        )
    )
)]
pub struct ApiDoc;

/// All API routes, without middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/map_data", get(routes::stations::get_map_data))
        .route(
            "/api/stations/nearest",
            get(routes::stations::get_nearest_stations),
        )
        .route(
            "/api/stations/:station_id/chart",
            get(routes::stations::get_station_chart),
        )
        .route("/api/hourly_stats", post(routes::stations::post_hourly_stats))
        .route("/api/predict", get(routes::predictions::get_predictions))
        .route(
            "/api/weather/current",
            get(routes::weather::get_current_weather),
        )
        .route(
            "/api/weather/forecast",
            get(routes::weather::get_weather_forecast),
        )
        .route("/api/model/metrics", get(routes::model::get_model_metrics))
        .route("/api/monitoring", get(routes::monitoring::get_monitoring))
        .route(
            "/api/poller/status",
            get(routes::poller::get_poller_status),
        )
        .with_state(state)
}
