// Velib Forecast API v0.1
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use velib_forecast_api::config::{init_tracing, AppConfig};
use velib_forecast_api::ml::ModelRegistry;
use velib_forecast_api::routes::AppState;
use velib_forecast_api::services::gbfs::GbfsClient;
use velib_forecast_api::services::open_meteo::OpenMeteoClient;
use velib_forecast_api::services::poller::{self, PollerState, SharedPollerState};
use velib_forecast_api::{build_router, db, ApiDoc};

/// Log a startup failure and exit non-zero.
fn fatal(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!("{}: {}", context, err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();
    init_tracing(&config.log_format);

    // Set up database connection pool
    let pool = match db::connect_with_retry(
        &config.database_url,
        config.db_connect_retries,
        Duration::from_secs(config.db_connect_retry_delay_secs),
    )
    .await
    {
        Ok(pool) => pool,
        Err(e) => fatal("Failed to connect to database", e),
    };

    // Run migrations
    if let Err(e) = sqlx::migrate!().run(&pool).await {
        fatal("Failed to run database migrations", e);
    }
    tracing::info!("Database migrations completed");

    let gbfs_client = match GbfsClient::new(
        &config.http_user_agent,
        &config.station_info_url,
        &config.station_status_url,
    ) {
        Ok(c) => c,
        Err(e) => fatal("Failed to create GBFS client", e),
    };
    let weather_client = match OpenMeteoClient::new(
        &config.http_user_agent,
        &config.weather_api_url,
        config.weather_latitude,
        config.weather_longitude,
    ) {
        Ok(c) => c,
        Err(e) => fatal("Failed to create Open-Meteo client", e),
    };

    // Model is loaded lazily and reloaded whenever the trainer replaces it
    let registry = ModelRegistry::new(&config.model_dir);
    if registry.current().await.is_none() {
        tracing::warn!(
            "No model in {}; predictions will use the fallback curve until velib-trainer runs",
            config.model_dir
        );
    }

    // Create shared poller state and spawn background pollers
    let poller_state: SharedPollerState = Arc::new(RwLock::new(PollerState::new(
        config.station_poll_interval_secs,
        config.weather_poll_interval_secs,
    )));
    tokio::spawn(poller::run_station_poller(
        pool.clone(),
        gbfs_client,
        poller_state.clone(),
    ));
    tokio::spawn(poller::run_weather_poller(
        pool.clone(),
        weather_client,
        poller_state.clone(),
    ));

    let state = AppState {
        pool,
        registry,
        poller_state,
    };

    // CORS: GET views plus the POST hourly stats query
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let app = build_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => fatal("Failed to bind TCP listener", e),
    };
    if let Err(e) = axum::serve(listener, app).await {
        fatal("Server terminated unexpectedly", e);
    }
}
