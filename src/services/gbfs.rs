//! GBFS station feed client.
//!
//! Reads the `station_information` and `station_status` feeds of a GBFS
//! system (Velib Métropole by default). Both feeds wrap their rows in
//! `{"data": {"stations": [...]}}`. Rows missing a usable id, position or
//! availability count are skipped rather than failing the whole scrape.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::db::queries::{InsertStatusParams, UpsertStationParams};
use crate::errors::AppError;
use crate::helpers::f64_to_decimal_full;

/// Per-request timeout for feed fetches.
const GBFS_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct GbfsClient {
    client: reqwest::Client,
    info_url: String,
    status_url: String,
}

/// Parsed result of one scrape of both feeds.
#[derive(Debug, Clone, Default)]
pub struct GbfsSnapshot {
    pub stations: Vec<UpsertStationParams>,
    pub statuses: Vec<InsertStatusParams>,
}

// --- GBFS JSON response types ---

#[derive(Debug, Deserialize)]
struct GbfsEnvelope<T> {
    data: GbfsStations<T>,
}

#[derive(Debug, Deserialize)]
struct GbfsStations<T> {
    #[serde(default = "Vec::new")]
    stations: Vec<T>,
}

/// Station ids are numbers in some feeds and strings in others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedId {
    Int(i64),
    Str(String),
}

impl FeedId {
    fn into_string(self) -> Option<String> {
        match self {
            FeedId::Int(n) => Some(n.to_string()),
            FeedId::Str(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            FeedId::Str(_) => None,
        }
    }
}

/// GBFS 1.x uses 0/1 for booleans, 2.x uses true/false.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedFlag {
    Bool(bool),
    Int(i64),
}

impl FeedFlag {
    fn as_bool(&self) -> bool {
        match self {
            FeedFlag::Bool(b) => *b,
            FeedFlag::Int(n) => *n != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StationInformation {
    station_id: Option<FeedId>,
    name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    capacity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StationStatus {
    station_id: Option<FeedId>,
    num_bikes_available: Option<i64>,
    num_docks_available: Option<i64>,
    is_renting: Option<FeedFlag>,
    last_reported: Option<i64>,
}

impl GbfsClient {
    pub fn new(user_agent: &str, info_url: &str, status_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(GBFS_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            info_url: info_url.to_string(),
            status_url: status_url.to_string(),
        })
    }

    /// Fetch both feeds concurrently. Every status row is stamped with
    /// `scraped_at`.
    pub async fn fetch_snapshot(&self, scraped_at: DateTime<Utc>) -> Result<GbfsSnapshot, AppError> {
        let (info, status) = futures::try_join!(
            self.fetch_feed::<StationInformation>(&self.info_url),
            self.fetch_feed::<StationStatus>(&self.status_url),
        )?;

        Ok(GbfsSnapshot {
            stations: parse_station_information(info),
            statuses: parse_station_status(status, scraped_at),
        })
    }

    async fn fetch_feed<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::ExternalServiceError(format!("GBFS request to {} failed: {}", url, e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "GBFS feed {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let envelope: GbfsEnvelope<T> = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Failed to parse GBFS feed {}: {}", url, e))
        })?;
        Ok(envelope.data.stations)
    }
}

fn parse_station_information(rows: Vec<StationInformation>) -> Vec<UpsertStationParams> {
    let total = rows.len();
    let stations: Vec<UpsertStationParams> = rows
        .into_iter()
        .filter_map(|row| {
            let station_id = row.station_id?.into_string()?;
            let latitude = row.lat.and_then(f64_to_decimal_full)?;
            let longitude = row.lon.and_then(f64_to_decimal_full)?;
            Some(UpsertStationParams {
                station_id,
                name: row.name.unwrap_or_default(),
                latitude,
                longitude,
                capacity: row.capacity.and_then(|c| i32::try_from(c).ok()),
            })
        })
        .collect();
    if stations.len() < total {
        tracing::debug!(
            "Skipped {} malformed station_information rows",
            total - stations.len()
        );
    }
    stations
}

fn parse_station_status(rows: Vec<StationStatus>, scraped_at: DateTime<Utc>) -> Vec<InsertStatusParams> {
    let total = rows.len();
    let statuses: Vec<InsertStatusParams> = rows
        .into_iter()
        .filter_map(|row| {
            let station_id = row.station_id?.into_string()?;
            let bikes = i32::try_from(row.num_bikes_available?).ok()?;
            let docks = i32::try_from(row.num_docks_available?).ok()?;
            if bikes < 0 || docks < 0 {
                return None;
            }
            Some(InsertStatusParams {
                station_id,
                scraped_at,
                bikes_available: bikes,
                docks_available: docks,
                is_renting: row.is_renting.map(|f| f.as_bool()).unwrap_or(true),
                last_reported: row
                    .last_reported
                    .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            })
        })
        .collect();
    if statuses.len() < total {
        tracing::debug!(
            "Skipped {} malformed station_status rows",
            total - statuses.len()
        );
    }
    statuses
}
