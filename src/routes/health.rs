//! GET /api/health

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::routes::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the store does not answer
    pub status: String,
    pub version: String,
    pub database: bool,
    /// False means predictions are served from the fallback curve
    pub model_loaded: bool,
}

impl HealthResponse {
    fn new(database: bool, model_loaded: bool) -> Self {
        let status = if database { "ok" } else { "degraded" };
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
            model_loaded,
        }
    }
}

/// Liveness plus store and model readiness. Always 200.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .map_err(|e| tracing::warn!("Health check could not reach the store: {}", e))
        .is_ok();
    let model_loaded = state.registry.current().await.is_some();
    Json(HealthResponse::new(database, model_loaded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_without_database() {
        let r = HealthResponse::new(false, true);
        assert_eq!(r.status, "degraded");
        assert!(r.model_loaded);
    }

    #[test]
    fn test_ok_without_model() {
        let r = HealthResponse::new(true, false);
        assert_eq!(r.status, "ok");
        assert!(!r.model_loaded);
    }
}
