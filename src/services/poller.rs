//! Background pollers for station availability and weather.
//!
//! Two independent loops run for the life of the server process:
//! - the station poller scrapes both GBFS feeds, upserts station metadata and
//!   appends one status row per station, every `STATION_POLL_INTERVAL_SECS`;
//! - the weather poller appends one current observation and upserts the
//!   hourly forecast table, every `WEATHER_POLL_INTERVAL_SECS`.
//!
//! A failed cycle is logged and retried on the next tick. State is in-memory
//! (`Arc<RwLock<PollerState>>`) and only feeds the status endpoints.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::db::queries;
use crate::errors::AppError;
use crate::services::gbfs::GbfsClient;
use crate::services::open_meteo::OpenMeteoClient;

/// Lower bound on the sleep between cycles (seconds).
const POLLER_MIN_SLEEP_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Poller state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

/// Status of one polling loop.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoopStatus {
    pub active: bool,
    pub interval_secs: u64,
    pub total_polls: u64,
    pub consecutive_failures: u32,
    pub last_poll_completed_at: Option<DateTime<Utc>>,
    pub last_poll_duration_ms: Option<u64>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// "ok", "error", or "pending"
    pub last_poll_result: String,
    pub last_error: Option<String>,
    /// Rows written by the last successful cycle
    pub last_rows_written: u64,
    pub next_wakeup_at: Option<DateTime<Utc>>,
}

impl LoopStatus {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            active: false,
            interval_secs,
            total_polls: 0,
            consecutive_failures: 0,
            last_poll_completed_at: None,
            last_poll_duration_ms: None,
            last_success_at: None,
            last_poll_result: "pending".to_string(),
            last_error: None,
            last_rows_written: 0,
            next_wakeup_at: None,
        }
    }

    /// Fold one finished cycle into the status.
    fn record(&mut self, started: DateTime<Utc>, finished: DateTime<Utc>, outcome: &Result<u64, AppError>) {
        self.total_polls += 1;
        self.last_poll_completed_at = Some(finished);
        self.last_poll_duration_ms = Some((finished - started).num_milliseconds().max(0) as u64);
        self.next_wakeup_at =
            Some(finished + Duration::seconds(self.sleep_secs() as i64));
        match outcome {
            Ok(rows) => {
                self.consecutive_failures = 0;
                self.last_success_at = Some(finished);
                self.last_poll_result = "ok".to_string();
                self.last_error = None;
                self.last_rows_written = *rows;
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.last_poll_result = "error".to_string();
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn sleep_secs(&self) -> u64 {
        self.interval_secs.max(POLLER_MIN_SLEEP_SECS)
    }
}

/// Global poller state, exposed via the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PollerState {
    pub stations: LoopStatus,
    pub weather: LoopStatus,
}

impl PollerState {
    pub fn new(station_interval_secs: u64, weather_interval_secs: u64) -> Self {
        Self {
            stations: LoopStatus::new(station_interval_secs),
            weather: LoopStatus::new(weather_interval_secs),
        }
    }
}

/// Shared poller state handle.
pub type SharedPollerState = Arc<RwLock<PollerState>>;

#[derive(Debug, Clone, Copy)]
enum PollerKind {
    Stations,
    Weather,
}

impl PollerKind {
    fn status<'a>(&self, state: &'a mut PollerState) -> &'a mut LoopStatus {
        match self {
            PollerKind::Stations => &mut state.stations,
            PollerKind::Weather => &mut state.weather,
        }
    }
}

// ---------------------------------------------------------------------------
// Poll cycles
// ---------------------------------------------------------------------------

/// One station scrape. Returns the number of status rows appended.
pub async fn poll_stations_once(
    pool: &PgPool,
    client: &GbfsClient,
    scraped_at: DateTime<Utc>,
) -> Result<u64, AppError> {
    let snapshot = client.fetch_snapshot(scraped_at).await?;
    let upserted = queries::upsert_stations(pool, &snapshot.stations).await?;
    let inserted = queries::insert_status_batch(pool, &snapshot.statuses).await?;
    tracing::info!(
        "Station poll: {} stations upserted, {} status rows appended",
        upserted,
        inserted
    );
    Ok(inserted)
}

/// One weather fetch. Returns observation + forecast rows written.
pub async fn poll_weather_once(
    pool: &PgPool,
    client: &OpenMeteoClient,
    observed_at: DateTime<Utc>,
) -> Result<u64, AppError> {
    let snapshot = client.fetch(observed_at).await?;

    let mut written = 0;
    match snapshot.current {
        Some(current) => {
            queries::insert_weather_observation(pool, current).await?;
            written += 1;
        }
        None => tracing::warn!("Weather poll: response had no usable current conditions"),
    }

    let (inserted, updated) =
        queries::upsert_forecasts(pool, &snapshot.forecasts, observed_at).await?;
    tracing::info!(
        "Weather poll: forecasts {} inserted, {} updated",
        inserted,
        updated
    );
    Ok(written + inserted + updated)
}

// ---------------------------------------------------------------------------
// Main poller loops
// ---------------------------------------------------------------------------

/// Run the station poller. Never returns; spawn via `tokio::spawn`.
pub async fn run_station_poller(pool: PgPool, client: GbfsClient, state: SharedPollerState) {
    tracing::info!("Station poller started");
    loop {
        let started = Utc::now();
        let outcome = poll_stations_once(&pool, &client, started).await;
        let sleep = finish_cycle(&state, PollerKind::Stations, started, outcome).await;
        sleep_secs(sleep).await;
    }
}

/// Run the weather poller. Never returns; spawn via `tokio::spawn`.
pub async fn run_weather_poller(pool: PgPool, client: OpenMeteoClient, state: SharedPollerState) {
    tracing::info!("Weather poller started");
    loop {
        let started = Utc::now();
        let outcome = poll_weather_once(&pool, &client, started).await;
        let sleep = finish_cycle(&state, PollerKind::Weather, started, outcome).await;
        sleep_secs(sleep).await;
    }
}

/// Log the outcome, publish it, and return how long to sleep.
async fn finish_cycle(
    state: &SharedPollerState,
    kind: PollerKind,
    started: DateTime<Utc>,
    outcome: Result<u64, AppError>,
) -> u64 {
    if let Err(e) = &outcome {
        tracing::error!("{:?} poll failed: {}", kind, e);
    }
    let mut s = state.write().await;
    let status = kind.status(&mut s);
    status.active = true;
    status.record(started, Utc::now(), &outcome);
    status.sleep_secs()
}

/// Async sleep helper.
async fn sleep_secs(secs: u64) {
    tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_state_is_pending() {
        let state = PollerState::new(60, 480);
        assert_eq!(state.stations.interval_secs, 60);
        assert_eq!(state.weather.interval_secs, 480);
        assert_eq!(state.stations.last_poll_result, "pending");
        assert!(!state.weather.active);
    }

    #[test]
    fn test_record_success() {
        let mut status = LoopStatus::new(60);
        status.record(
            at("2026-03-02T08:00:00Z"),
            at("2026-03-02T08:00:01.250Z"),
            &Ok(1460),
        );
        assert_eq!(status.total_polls, 1);
        assert_eq!(status.last_poll_result, "ok");
        assert_eq!(status.last_rows_written, 1460);
        assert_eq!(status.last_poll_duration_ms, Some(1250));
        assert_eq!(status.next_wakeup_at, Some(at("2026-03-02T08:01:01.250Z")));
        assert_eq!(status.last_success_at, Some(at("2026-03-02T08:00:01.250Z")));
    }

    #[test]
    fn test_record_failure_keeps_last_success() {
        let mut status = LoopStatus::new(60);
        status.record(at("2026-03-02T08:00:00Z"), at("2026-03-02T08:00:01Z"), &Ok(10));
        status.record(
            at("2026-03-02T08:01:01Z"),
            at("2026-03-02T08:01:02Z"),
            &Err(AppError::ExternalServiceError("HTTP 503".into())),
        );
        status.record(
            at("2026-03-02T08:02:02Z"),
            at("2026-03-02T08:02:03Z"),
            &Err(AppError::ExternalServiceError("HTTP 503".into())),
        );
        assert_eq!(status.total_polls, 3);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_poll_result, "error");
        assert!(status.last_error.as_deref().unwrap().contains("HTTP 503"));
        assert_eq!(status.last_success_at, Some(at("2026-03-02T08:00:01Z")));
        assert_eq!(status.last_rows_written, 10);
    }

    #[test]
    fn test_sleep_has_floor() {
        assert_eq!(LoopStatus::new(0).sleep_secs(), POLLER_MIN_SLEEP_SECS);
        assert_eq!(LoopStatus::new(480).sleep_secs(), 480);
    }

    #[tokio::test]
    async fn test_finish_cycle_updates_only_its_loop() {
        let state: SharedPollerState = Arc::new(RwLock::new(PollerState::new(60, 480)));
        let sleep = finish_cycle(&state, PollerKind::Weather, Utc::now(), Ok(49)).await;
        assert_eq!(sleep, 480);

        let s = state.read().await;
        assert!(s.weather.active);
        assert_eq!(s.weather.last_rows_written, 49);
        assert!(!s.stations.active);
        assert_eq!(s.stations.total_polls, 0);
    }
}
