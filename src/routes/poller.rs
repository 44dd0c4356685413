//! Poller status HTTP endpoint.
//!
//! GET /api/poller/status: returns the state of the station and weather
//! pollers as JSON.

use axum::extract::State;
use axum::Json;

use crate::services::poller::{PollerState, SharedPollerState};

/// Get the current poller status.
///
/// Each loop reports its interval, poll counters, last result and error, rows
/// written by the last successful cycle and the next scheduled wakeup.
#[utoipa::path(
    get,
    path = "/api/poller/status",
    tag = "Poller",
    responses(
        (status = 200, description = "Current poller status", body = PollerState),
    )
)]
pub async fn get_poller_status(State(state): State<SharedPollerState>) -> Json<PollerState> {
    let s = state.read().await;
    Json(s.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[tokio::test]
    async fn test_status_serializes_both_loops() {
        let state: SharedPollerState = Arc::new(RwLock::new(PollerState::new(60, 480)));
        let Json(body) = get_poller_status(State(state)).await;
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stations"]["interval_secs"], 60);
        assert_eq!(json["weather"]["interval_secs"], 480);
        assert_eq!(json["weather"]["last_poll_result"], "pending");
    }
}
