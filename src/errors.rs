//! API error type shared by handlers, feed clients and pollers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// JSON body of every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Unknown station, or nothing recorded yet.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// GBFS or Open-Meteo failed or returned something unparseable.
    #[error("Upstream feed error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Store error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalError(_) | AppError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::InternalError(msg) => msg,
            AppError::DatabaseError(err) => {
                // Query text and connection details stay in the logs.
                tracing::error!("Store error while serving request: {:?}", err);
                "Internal database error".to_string()
            }
        };
        (status, axum::Json(ErrorResponse { error })).into_response()
    }
}
