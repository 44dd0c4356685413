//! Availability prediction pipeline.
//!
//! Status history and weather observations are bucketed into 10-minute
//! intervals, averaged across all stations into one global target per bucket,
//! and used to fit a gradient-boosted regression model. At request time the
//! global prediction is rescaled to a station's capacity.
//!
//! The bucket width, feature order and default capacity defined here are
//! shared by training and serving; the model artifact records them and is
//! rejected on load if they differ.

pub mod artifacts;
pub mod features;
pub mod gbdt;
pub mod predictor;
pub mod registry;
pub mod trainer;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use artifacts::{ArtifactError, ModelArtifact};
pub use features::{BucketTarget, StatusSample, TrainingRow, WeatherSample};
pub use registry::{LoadedModel, ModelRegistry};
pub use trainer::{Metrics, TrainingError};

/// Width of an aggregation bucket in minutes.
pub const BUCKET_MINUTES: i64 = 10;

/// Fewest cleaned rows the trainer accepts.
pub const MIN_TRAINING_ROWS: usize = 100;

/// Capacity the global-average target implicitly corresponds to.
pub const DEFAULT_AVERAGE_CAPACITY: i32 = 30;

/// Weather used when no observation precedes a bucket.
pub const DEFAULT_TEMPERATURE: f64 = 15.0;
pub const DEFAULT_WINDSPEED: f64 = 10.0;
/// WMO code 0, clear sky.
pub const DEFAULT_WEATHER_CODE: i32 = 0;

/// Number of forecast entries served per prediction request.
pub const PREDICTION_HORIZON: usize = 48;

/// Seed for the train/test shuffle and synthetic rows.
pub const SPLIT_SEED: u64 = 42;
/// Share of rows held out for evaluation.
pub const TEST_FRACTION: f64 = 0.2;

pub const NUM_FEATURES: usize = 5;

/// Model input order. Must match `FeatureVector::to_array`.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "hour",
    "day_of_week",
    "temperature",
    "windspeed",
    "weather_code",
];

/// Where the training rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Aggregated from the status history.
    Observed,
    /// Generated because too little observed data was available.
    Synthetic,
}
