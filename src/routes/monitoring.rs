//! Ingestion monitoring endpoint.
//!
//! GET /api/monitoring: store counters plus the state of both pollers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::poller::PollerState;

#[derive(Debug, Serialize, ToSchema)]
pub struct MonitoringResponse {
    pub total_stations: i64,
    pub total_status_rows: i64,
    /// Scrape time of the newest status row
    pub last_update: Option<DateTime<Utc>>,
    /// Whole minutes since `last_update`; null when nothing was scraped yet
    pub minutes_since_update: Option<i64>,
    pub pollers: PollerState,
}

/// Whole minutes elapsed between `last` and `now`, never negative.
fn minutes_since(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    last.map(|t| (now - t).num_minutes().max(0))
}

/// Ingestion health: row counts, data freshness and poller state.
#[utoipa::path(
    get,
    path = "/api/monitoring",
    tag = "Monitoring",
    responses(
        (status = 200, description = "Store counters and poller state", body = MonitoringResponse),
        (status = 500, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_monitoring(
    State(state): State<AppState>,
) -> Result<Json<MonitoringResponse>, AppError> {
    let counts = queries::get_store_counts(&state.pool).await?;
    let pollers = state.poller_state.read().await.clone();

    Ok(Json(MonitoringResponse {
        total_stations: counts.total_stations,
        total_status_rows: counts.total_status_rows,
        last_update: counts.last_scraped_at,
        minutes_since_update: minutes_since(counts.last_scraped_at, Utc::now()),
        pollers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_since() {
        let now: DateTime<Utc> = "2026-03-02T08:30:59Z".parse().unwrap();
        assert_eq!(minutes_since(None, now), None);
        assert_eq!(
            minutes_since(Some("2026-03-02T08:00:00Z".parse().unwrap()), now),
            Some(30)
        );
        // Clock skew between scraper and server never yields a negative age.
        assert_eq!(
            minutes_since(Some("2026-03-02T08:35:00Z".parse().unwrap()), now),
            Some(0)
        );
    }
}
