//! Station HTTP endpoints.
//!
//! - GET  /api/map_data?min_bikes&min_docks&name&sort_by&order
//! - GET  /api/stations/nearest?lat&lon&limit
//! - GET  /api/stations/:station_id/chart?mode=bikes|docks
//! - POST /api/hourly_stats

use std::cmp::Ordering;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::{IntoParams, ToSchema};

use crate::db::models::{HourlyAverage, StationWithStatus};
use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{dec_to_f64, haversine_km};

/// Status rows considered by the station chart.
const CHART_HISTORY_ROWS: i64 = 100;
const DEFAULT_NEAREST_LIMIT: usize = 3;
const MAX_NEAREST_LIMIT: usize = 50;
const MAX_HOURLY_STATS_STATIONS: usize = 500;

// ---------------------------------------------------------------------------
// Query / body types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Name,
    Bikes,
    Docks,
    Capacity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct MapDataQuery {
    /// Only stations with at least this many bikes
    pub min_bikes: Option<i32>,
    /// Only stations with at least this many free docks
    pub min_docks: Option<i32>,
    /// Case-insensitive substring of the station name
    pub name: Option<String>,
    /// "name" (default), "bikes", "docks" or "capacity"
    #[param(inline)]
    pub sort_by: Option<SortBy>,
    /// "asc" (default) or "desc"
    #[param(inline)]
    pub order: Option<SortOrder>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct NearestQuery {
    /// Latitude (WGS84)
    pub lat: f64,
    /// Longitude (WGS84)
    pub lon: f64,
    /// Number of stations to return (default 3, max 50)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    #[default]
    Bikes,
    Docks,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ChartQuery {
    /// "bikes" (default) or "docks"
    #[param(inline)]
    pub mode: Option<ChartMode>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HourlyStatsRequest {
    pub station_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A station with its latest known availability.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StationView {
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: Option<i32>,
    /// Null when the station has never been scraped
    pub bikes_available: Option<i32>,
    pub docks_available: Option<i32>,
    pub is_renting: Option<bool>,
    pub last_update: Option<DateTime<Utc>>,
}

impl From<StationWithStatus> for StationView {
    fn from(s: StationWithStatus) -> Self {
        Self {
            station_id: s.station_id,
            name: s.name,
            latitude: dec_to_f64(s.latitude),
            longitude: dec_to_f64(s.longitude),
            capacity: s.capacity,
            bikes_available: s.bikes_available,
            docks_available: s.docks_available,
            is_renting: s.is_renting,
            last_update: s.scraped_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct NearestStation {
    #[serde(flatten)]
    pub station: StationView,
    /// Great-circle distance from the query point in kilometres
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HourlyPoint {
    /// Hour of day, UTC (0–23)
    pub hour: i32,
    pub value: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StationChartResponse {
    pub station_id: String,
    pub name: String,
    pub mode: ChartMode,
    /// Averages for the hours that have data, ascending by hour
    pub data: Vec<HourlyPoint>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HourlyStatsResponse {
    /// Mean bikes available for each hour 0–23; null where no data exists
    pub data: Vec<Option<f64>>,
    /// Summed capacity of the requested stations
    pub capacity: i64,
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Apply map filters and sorting. Stations without data for a filtered field
/// are excluded; for sorting, missing values order before any present value.
pub fn filter_and_sort(stations: Vec<StationView>, query: &MapDataQuery) -> Vec<StationView> {
    let needle = query
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_lowercase);

    let mut out: Vec<StationView> = stations
        .into_iter()
        .filter(|s| match query.min_bikes {
            Some(min) => s.bikes_available.is_some_and(|b| b >= min),
            None => true,
        })
        .filter(|s| match query.min_docks {
            Some(min) => s.docks_available.is_some_and(|d| d >= min),
            None => true,
        })
        .filter(|s| match &needle {
            Some(n) => s.name.to_lowercase().contains(n.as_str()),
            None => true,
        })
        .collect();

    let sort_by = query.sort_by.unwrap_or_default();
    out.sort_by(|a, b| {
        let ord = match sort_by {
            SortBy::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortBy::Bikes => a.bikes_available.cmp(&b.bikes_available),
            SortBy::Docks => a.docks_available.cmp(&b.docks_available),
            SortBy::Capacity => a.capacity.cmp(&b.capacity),
        };
        ord.then_with(|| a.station_id.cmp(&b.station_id))
    });
    if query.order.unwrap_or_default() == SortOrder::Desc {
        out.reverse();
    }
    out
}

/// The `limit` stations closest to `(lat, lon)`, nearest first.
pub fn nearest_stations(
    stations: Vec<StationView>,
    lat: f64,
    lon: f64,
    limit: usize,
) -> Vec<NearestStation> {
    let mut with_distance: Vec<NearestStation> = stations
        .into_iter()
        .map(|s| {
            let distance_km = haversine_km(lat, lon, s.latitude, s.longitude);
            NearestStation {
                station: s,
                distance_km,
            }
        })
        .filter(|n| n.distance_km.is_finite())
        .collect();
    with_distance.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
    });
    with_distance.truncate(limit);
    for n in &mut with_distance {
        n.distance_km = (n.distance_km * 1000.0).round() / 1000.0;
    }
    with_distance
}

/// Spread hourly averages over a 24-slot day.
pub fn hourly_series(averages: &[HourlyAverage]) -> Vec<Option<f64>> {
    let mut data = vec![None; 24];
    for a in averages {
        if let Some(slot) = usize::try_from(a.hour).ok().and_then(|h| data.get_mut(h)) {
            *slot = Some(round2(a.avg_value));
        }
    }
    data
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// All stations with their latest status, filtered and sorted.
#[utoipa::path(
    get,
    path = "/api/map_data",
    tag = "Stations",
    params(MapDataQuery),
    responses(
        (status = 200, description = "Stations with latest status", body = Vec<StationView>),
        (status = 400, description = "Invalid filter or sort parameter", body = ErrorResponse),
    )
)]
pub async fn get_map_data(
    State(pool): State<PgPool>,
    Query(query): Query<MapDataQuery>,
) -> Result<Json<Vec<StationView>>, AppError> {
    let stations = queries::list_stations_with_latest_status(&pool).await?;
    let views = stations.into_iter().map(StationView::from).collect();
    Ok(Json(filter_and_sort(views, &query)))
}

/// Stations closest to a point.
#[utoipa::path(
    get,
    path = "/api/stations/nearest",
    tag = "Stations",
    params(NearestQuery),
    responses(
        (status = 200, description = "Nearest stations, closest first", body = Vec<NearestStation>),
        (status = 400, description = "Invalid coordinates or limit", body = ErrorResponse),
    )
)]
pub async fn get_nearest_stations(
    State(pool): State<PgPool>,
    Query(query): Query<NearestQuery>,
) -> Result<Json<Vec<NearestStation>>, AppError> {
    if !(-90.0..=90.0).contains(&query.lat) || !(-180.0..=180.0).contains(&query.lon) {
        return Err(AppError::BadRequest(format!(
            "Coordinates out of range: lat={}, lon={}",
            query.lat, query.lon
        )));
    }
    let limit = query.limit.unwrap_or(DEFAULT_NEAREST_LIMIT);
    if limit == 0 || limit > MAX_NEAREST_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_NEAREST_LIMIT
        )));
    }

    let stations = queries::list_stations_with_latest_status(&pool).await?;
    let views = stations.into_iter().map(StationView::from).collect();
    Ok(Json(nearest_stations(views, query.lat, query.lon, limit)))
}

/// Hour-of-day profile over a station's most recent status rows.
#[utoipa::path(
    get,
    path = "/api/stations/{station_id}/chart",
    tag = "Stations",
    params(
        ("station_id" = String, Path, description = "Station identifier"),
        ChartQuery,
    ),
    responses(
        (status = 200, description = "Hourly averages", body = StationChartResponse),
        (status = 404, description = "Unknown station", body = ErrorResponse),
    )
)]
pub async fn get_station_chart(
    State(pool): State<PgPool>,
    Path(station_id): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<StationChartResponse>, AppError> {
    let station = queries::get_station(&pool, &station_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Station {} not found", station_id)))?;

    let mode = query.mode.unwrap_or_default();
    let averages = queries::get_station_hourly_averages(
        &pool,
        &station.station_id,
        mode == ChartMode::Docks,
        CHART_HISTORY_ROWS,
    )
    .await?;

    Ok(Json(StationChartResponse {
        station_id: station.station_id,
        name: station.name,
        mode,
        data: averages
            .into_iter()
            .map(|a| HourlyPoint {
                hour: a.hour,
                value: round2(a.avg_value),
            })
            .collect(),
    }))
}

/// Combined hour-of-day bike averages for a set of stations.
#[utoipa::path(
    post,
    path = "/api/hourly_stats",
    tag = "Stations",
    request_body = HourlyStatsRequest,
    responses(
        (status = 200, description = "24 hourly averages and total capacity", body = HourlyStatsResponse),
        (status = 400, description = "Empty or oversized station list", body = ErrorResponse),
    )
)]
pub async fn post_hourly_stats(
    State(pool): State<PgPool>,
    Json(body): Json<HourlyStatsRequest>,
) -> Result<Json<HourlyStatsResponse>, AppError> {
    if body.station_ids.is_empty() {
        return Err(AppError::BadRequest("station_ids must not be empty".into()));
    }
    if body.station_ids.len() > MAX_HOURLY_STATS_STATIONS {
        return Err(AppError::BadRequest(format!(
            "At most {} station_ids per request",
            MAX_HOURLY_STATS_STATIONS
        )));
    }

    let averages = queries::get_hourly_averages_for_stations(&pool, &body.station_ids).await?;
    let capacity = queries::sum_capacity(&pool, &body.station_ids).await?;

    Ok(Json(HourlyStatsResponse {
        data: hourly_series(&averages),
        capacity,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, name: &str, bikes: Option<i32>, docks: Option<i32>, cap: Option<i32>) -> StationView {
        StationView {
            station_id: id.to_string(),
            name: name.to_string(),
            latitude: 48.85,
            longitude: 2.35,
            capacity: cap,
            bikes_available: bikes,
            docks_available: docks,
            is_renting: Some(true),
            last_update: None,
        }
    }

    fn sample() -> Vec<StationView> {
        vec![
            station("1", "République", Some(5), Some(20), Some(25)),
            station("2", "bastille", Some(0), Some(30), Some(30)),
            station("3", "Gare de Lyon", Some(12), Some(3), Some(15)),
            station("4", "Nation", None, None, Some(40)),
        ]
    }

    fn ids(stations: &[StationView]) -> Vec<&str> {
        stations.iter().map(|s| s.station_id.as_str()).collect()
    }

    #[test]
    fn test_default_sort_is_case_insensitive_name() {
        let out = filter_and_sort(sample(), &MapDataQuery::default());
        assert_eq!(ids(&out), vec!["2", "3", "4", "1"]);
    }

    #[test]
    fn test_min_bikes_excludes_unknown() {
        let query = MapDataQuery {
            min_bikes: Some(1),
            ..Default::default()
        };
        let out = filter_and_sort(sample(), &query);
        assert_eq!(ids(&out), vec!["3", "1"]);
    }

    #[test]
    fn test_name_filter_and_docks_sort_desc() {
        let query = MapDataQuery {
            name: Some("  A ".to_string()),
            min_docks: Some(0),
            sort_by: Some(SortBy::Docks),
            order: Some(SortOrder::Desc),
            ..Default::default()
        };
        let out = filter_and_sort(sample(), &query);
        assert_eq!(ids(&out), vec!["2", "3"]);
    }

    #[test]
    fn test_sort_by_capacity() {
        let query = MapDataQuery {
            sort_by: Some(SortBy::Capacity),
            ..Default::default()
        };
        let out = filter_and_sort(sample(), &query);
        assert_eq!(ids(&out), vec!["3", "1", "2", "4"]);
    }

    #[test]
    fn test_query_parsing() {
        let q: MapDataQuery =
            serde_json::from_value(serde_json::json!({"sort_by": "bikes", "order": "desc"})).unwrap();
        assert_eq!(q.sort_by, Some(SortBy::Bikes));
        assert_eq!(q.order, Some(SortOrder::Desc));
        assert!(serde_json::from_value::<MapDataQuery>(serde_json::json!({"sort_by": "altitude"})).is_err());
    }

    #[test]
    fn test_nearest_stations() {
        let mut stations = sample();
        stations[0].latitude = 48.8674; // République
        stations[0].longitude = 2.3636;
        stations[1].latitude = 48.8532; // Bastille
        stations[1].longitude = 2.3691;
        stations[2].latitude = 48.8443; // Gare de Lyon
        stations[2].longitude = 2.3743;
        stations[3].latitude = 48.8483; // Nation
        stations[3].longitude = 2.3959;

        let out = nearest_stations(stations, 48.8530, 2.3690, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].station.station_id, "2");
        assert_eq!(out[1].station.station_id, "3");
        assert!(out[0].distance_km < 0.05);
        assert!(out[0].distance_km <= out[1].distance_km);
    }

    #[test]
    fn test_hourly_series() {
        let averages = vec![
            HourlyAverage { hour: 0, avg_value: 3.333 },
            HourlyAverage { hour: 8, avg_value: 12.0 },
            HourlyAverage { hour: 23, avg_value: 1.0 },
            HourlyAverage { hour: 24, avg_value: 9.0 },
        ];
        let data = hourly_series(&averages);
        assert_eq!(data.len(), 24);
        assert_eq!(data[0], Some(3.33));
        assert_eq!(data[8], Some(12.0));
        assert_eq!(data[23], Some(1.0));
        assert_eq!(data[1], None);
        assert_eq!(data.iter().filter(|v| v.is_some()).count(), 3);
    }
}
