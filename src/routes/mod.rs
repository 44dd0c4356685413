//! HTTP handlers.
//!
//! Every handler takes its dependencies from [`AppState`]; handlers that only
//! need the pool or the poller state extract those directly via `FromRef`.

pub mod health;
pub mod model;
pub mod monitoring;
pub mod poller;
pub mod predictions;
pub mod stations;
pub mod weather;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::ml::ModelRegistry;
use crate::services::poller::SharedPollerState;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: ModelRegistry,
    pub poller_state: SharedPollerState,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for SharedPollerState {
    fn from_ref(state: &AppState) -> Self {
        state.poller_state.clone()
    }
}

impl FromRef<AppState> for ModelRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.registry.clone()
    }
}
