// Velib availability model trainer.
//
// Aggregates the last TRAINER_HISTORY_DAYS of status history per bucket in the
// store, joins weather observations, fits the model and writes
// `velib_model.json` + `metrics.json` to MODEL_DIR. Exits non-zero on any
// failure, leaving existing artifacts untouched.

use std::path::Path;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use sqlx::PgPool;

use velib_forecast_api::config::{init_tracing, AppConfig};
use velib_forecast_api::db::{self, queries};
use velib_forecast_api::ml::artifacts::{save_artifacts, TrainingLock};
use velib_forecast_api::ml::features::join_weather;
use velib_forecast_api::ml::gbdt::BoostingParams;
use velib_forecast_api::ml::trainer::{select_training_rows, train};
use velib_forecast_api::ml::{BucketTarget, Metrics, TrainingError, WeatherSample, BUCKET_MINUTES};

/// Extra weather history loaded before the first status bucket, so the first
/// buckets can inherit the preceding conditions.
const WEATHER_LOOKBACK_DAYS: i64 = 1;

async fn run(config: &AppConfig, pool: &PgPool) -> Result<Metrics, TrainingError> {
    let since = Utc::now() - ChronoDuration::days(config.trainer_history_days);
    let buckets = queries::get_bucket_averages(pool, since, BUCKET_MINUTES).await?;
    tracing::info!(
        "Loaded {} status buckets ({} status rows) since {}",
        buckets.len(),
        buckets.iter().map(|b| b.samples).sum::<i64>(),
        since
    );

    let weather_since = buckets.first().map(|b| b.bucket).unwrap_or(since)
        - ChronoDuration::days(WEATHER_LOOKBACK_DAYS);
    let observations = queries::get_observations_since(pool, weather_since).await?;
    tracing::info!(
        "Loaded {} weather observations since {}",
        observations.len(),
        weather_since
    );

    let targets: Vec<BucketTarget> = buckets
        .iter()
        .map(|b| BucketTarget {
            bucket: b.bucket,
            mean_bikes: b.mean_bikes,
            samples: b.samples,
        })
        .collect();
    let weather_samples: Vec<WeatherSample> = observations
        .iter()
        .filter_map(|o| {
            Some(WeatherSample {
                timestamp: o.observed_at,
                temperature: o.temperature.to_f64()?,
                windspeed: o.windspeed.to_f64()?,
                weather_code: o.weather_code,
            })
        })
        .collect();

    let rows = join_weather(&targets, &weather_samples);
    tracing::info!("Built {} training rows", rows.len());

    let (rows, data_source) =
        select_training_rows(rows, config.min_training_rows, config.allow_synthetic_data)?;
    let outcome = train(&rows, data_source, BoostingParams::default(), Utc::now())?;

    save_artifacts(Path::new(&config.model_dir), &outcome.artifact, &outcome.metrics)?;
    Ok(outcome.metrics)
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();
    init_tracing(&config.log_format);

    let model_dir = Path::new(&config.model_dir);
    let lock = match TrainingLock::acquire(model_dir) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!("Cannot start training: {}", e);
            std::process::exit(1);
        }
    };

    let pool = match db::connect_with_retry(
        &config.database_url,
        config.db_connect_retries,
        Duration::from_secs(config.db_connect_retry_delay_secs),
    )
    .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to connect to database: {}", e);
            drop(lock);
            std::process::exit(1);
        }
    };

    match run(&config, &pool).await {
        Ok(metrics) => {
            tracing::info!(
                "Training complete: R² {:.4}, RMSE {:.4}, {} train / {} test rows",
                metrics.r2,
                metrics.rmse,
                metrics.rows_train,
                metrics.rows_test
            );
        }
        Err(e) => {
            tracing::error!("Training failed: {}", e);
            drop(lock);
            std::process::exit(1);
        }
    }
}
