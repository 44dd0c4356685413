//! Train/test split, fitting and evaluation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::artifacts::{ArtifactError, ModelArtifact};
use super::features::{synthetic_rows, TrainingRow, SYNTHETIC_ROW_COUNT};
use super::gbdt::{BoostingParams, GradientBoostedTrees};
use super::{DataSource, FEATURE_NAMES, NUM_FEATURES, SPLIT_SEED, TEST_FRACTION};

/// Format of `Metrics::last_run`.
const LAST_RUN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("insufficient training data: {rows} rows after cleaning (minimum {min})")]
    InsufficientData { rows: usize, min: usize },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Evaluation summary persisted next to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Metrics {
    /// Coefficient of determination on the test split
    pub r2: f64,
    /// Root-mean-squared error on the test split, in bikes
    pub rmse: f64,
    pub rows_train: usize,
    pub rows_test: usize,
    /// Training completion time, UTC, "YYYY-MM-DD HH:MM:SS"
    pub last_run: String,
    /// Whether the model was fitted on observed or synthetic rows
    pub data_source: DataSource,
    /// Normalised split gain per feature
    #[serde(default)]
    pub feature_importance: BTreeMap<String, f64>,
}

/// A fitted model with its evaluation.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub metrics: Metrics,
}

/// Decide which rows to train on.
///
/// Observed rows are used when there are at least `min_rows`. Otherwise the
/// run fails, unless `allow_synthetic` is set, in which case the observed rows
/// are discarded and replaced by seeded synthetic rows tagged as such.
pub fn select_training_rows(
    observed: Vec<TrainingRow>,
    min_rows: usize,
    allow_synthetic: bool,
) -> Result<(Vec<TrainingRow>, DataSource), TrainingError> {
    if observed.len() >= min_rows {
        return Ok((observed, DataSource::Observed));
    }
    if allow_synthetic {
        tracing::warn!(
            "Only {} observed rows (minimum {}); training on {} synthetic rows instead",
            observed.len(),
            min_rows,
            SYNTHETIC_ROW_COUNT
        );
        return Ok((
            synthetic_rows(SYNTHETIC_ROW_COUNT, SPLIT_SEED),
            DataSource::Synthetic,
        ));
    }
    Err(TrainingError::InsufficientData {
        rows: observed.len(),
        min: min_rows,
    })
}

/// Shuffle with a fixed seed and hold out `ceil(n * test_fraction)` rows.
///
/// At least one row always stays in the training split.
pub fn train_test_split(
    rows: &[TrainingRow],
    test_fraction: f64,
    seed: u64,
) -> (Vec<TrainingRow>, Vec<TrainingRow>) {
    let n = rows.len();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    let n_test = n_test.min(n.saturating_sub(1));

    let test = indices[..n_test].iter().map(|&i| rows[i]).collect();
    let train = indices[n_test..].iter().map(|&i| rows[i]).collect();
    (train, test)
}

/// Coefficient of determination. A constant target scores 1.0 when predicted
/// exactly and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mse = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64;
    mse.sqrt()
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn split_xy(rows: &[TrainingRow]) -> (Vec<[f64; NUM_FEATURES]>, Vec<f64>) {
    rows.iter()
        .map(|r| (r.features.to_array(), r.target_bikes))
        .unzip()
}

/// Fit on a seeded 80/20 split and evaluate on the held-out rows.
pub fn train(
    rows: &[TrainingRow],
    data_source: DataSource,
    params: BoostingParams,
    trained_at: DateTime<Utc>,
) -> Result<TrainingOutcome, TrainingError> {
    if rows.len() < 2 {
        return Err(TrainingError::InsufficientData {
            rows: rows.len(),
            min: 2,
        });
    }

    let (train_rows, test_rows) = train_test_split(rows, TEST_FRACTION, SPLIT_SEED);
    let (x_train, y_train) = split_xy(&train_rows);
    let (x_test, y_test) = split_xy(&test_rows);

    tracing::info!(
        "Fitting {} trees on {} rows ({} held out)",
        params.n_estimators,
        x_train.len(),
        x_test.len()
    );
    let model = GradientBoostedTrees::fit(&x_train, &y_train, params);

    let predictions: Vec<f64> = x_test.iter().map(|x| model.predict(x)).collect();
    let r2 = r2_score(&y_test, &predictions);
    let error = rmse(&y_test, &predictions);

    let feature_importance = FEATURE_NAMES
        .iter()
        .zip(model.feature_importances())
        .map(|(name, v)| (name.to_string(), round4(v)))
        .collect();

    let metrics = Metrics {
        r2: round4(r2),
        rmse: round4(error),
        rows_train: x_train.len(),
        rows_test: x_test.len(),
        last_run: trained_at.format(LAST_RUN_FORMAT).to_string(),
        data_source,
        feature_importance,
    };

    tracing::info!(
        "Model R²: {:.4}, RMSE: {:.4} ({:?} data)",
        metrics.r2,
        metrics.rmse,
        data_source
    );

    Ok(TrainingOutcome {
        artifact: ModelArtifact::new(model, data_source, trained_at),
        metrics,
    })
}
