//! Model metrics endpoint.
//!
//! GET /api/model/metrics

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse};
use crate::ml::{LoadedModel, Metrics, ModelRegistry};

#[derive(Debug, Serialize, ToSchema)]
pub struct ModelMetricsResponse {
    #[serde(flatten)]
    pub metrics: Metrics,
    /// When the served model was trained
    pub trained_at: DateTime<Utc>,
    pub n_trees: usize,
    pub feature_names: Vec<String>,
}

impl ModelMetricsResponse {
    fn from_loaded(loaded: &LoadedModel) -> Option<Self> {
        let metrics = loaded.metrics.clone()?;
        Some(Self {
            metrics,
            trained_at: loaded.artifact.trained_at,
            n_trees: loaded.artifact.model.n_trees(),
            feature_names: loaded.artifact.feature_names.clone(),
        })
    }
}

/// Evaluation metrics of the model currently being served.
#[utoipa::path(
    get,
    path = "/api/model/metrics",
    tag = "Model",
    responses(
        (status = 200, description = "Metrics of the served model", body = ModelMetricsResponse),
        (status = 404, description = "No trained model or no metrics file", body = ErrorResponse),
    )
)]
pub async fn get_model_metrics(
    State(registry): State<ModelRegistry>,
) -> Result<Json<ModelMetricsResponse>, AppError> {
    registry
        .current()
        .await
        .as_deref()
        .and_then(ModelMetricsResponse::from_loaded)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No model metrics available".into()))
}
