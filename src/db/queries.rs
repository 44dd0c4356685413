use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    BucketAverage, HourlyAverage, Station, StationWithStatus, StatusRecord, WeatherForecastEntry,
    WeatherObservation,
};

/// Parameters for upserting a station from the information feed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertStationParams {
    pub station_id: String,
    pub name: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub capacity: Option<i32>,
}

/// Parameters for appending one status row.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatusParams {
    pub station_id: String,
    pub scraped_at: DateTime<Utc>,
    pub bikes_available: i32,
    pub docks_available: i32,
    pub is_renting: bool,
    pub last_reported: Option<DateTime<Utc>>,
}

/// Parameters for appending a weather observation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertObservationParams {
    pub observed_at: DateTime<Utc>,
    pub temperature: Decimal,
    pub windspeed: Decimal,
    pub weather_code: i32,
    pub source: String,
}

/// Parameters for upserting one forecast row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertForecastParams {
    pub forecast_time: DateTime<Utc>,
    pub temperature: Decimal,
    pub windspeed: Decimal,
    pub weather_code: i32,
    pub precipitation: Option<Decimal>,
}

/// Monitoring counters.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoreCounts {
    pub total_stations: i64,
    pub total_status_rows: i64,
    pub last_scraped_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Stations
// ---------------------------------------------------------------------------

/// ON CONFLICT cannot touch the same row twice in one statement, so a batch
/// keeps only the last entry per station id, ordered by id.
fn last_entry_per_station(stations: &[UpsertStationParams]) -> Vec<&UpsertStationParams> {
    let latest: BTreeMap<&str, &UpsertStationParams> = stations
        .iter()
        .map(|s| (s.station_id.as_str(), s))
        .collect();
    latest.into_values().collect()
}

/// Upsert all stations with one `UNNEST` statement. A station id repeated in
/// the batch keeps its last entry. Returns the number of rows written.
pub async fn upsert_stations(
    pool: &PgPool,
    stations: &[UpsertStationParams],
) -> Result<u64, sqlx::Error> {
    let latest = last_entry_per_station(stations);
    if latest.is_empty() {
        return Ok(0);
    }

    let mut ids = Vec::with_capacity(latest.len());
    let mut names = Vec::with_capacity(latest.len());
    let mut latitudes = Vec::with_capacity(latest.len());
    let mut longitudes = Vec::with_capacity(latest.len());
    let mut capacities = Vec::with_capacity(latest.len());
    for s in &latest {
        ids.push(s.station_id.clone());
        names.push(s.name.clone());
        latitudes.push(s.latitude);
        longitudes.push(s.longitude);
        capacities.push(s.capacity);
    }

    let result = sqlx::query(
        "INSERT INTO stations (station_id, name, latitude, longitude, capacity, updated_at)
         SELECT u.station_id, u.name, u.latitude, u.longitude, u.capacity, NOW()
         FROM UNNEST($1::TEXT[], $2::TEXT[], $3::NUMERIC[], $4::NUMERIC[], $5::INT[])
              AS u(station_id, name, latitude, longitude, capacity)
         ON CONFLICT (station_id) DO UPDATE SET
            name = EXCLUDED.name,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude,
            capacity = EXCLUDED.capacity,
            updated_at = NOW()",
    )
    .bind(&ids)
    .bind(&names)
    .bind(&latitudes)
    .bind(&longitudes)
    .bind(&capacities)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Get one station by id.
pub async fn get_station(pool: &PgPool, station_id: &str) -> Result<Option<Station>, sqlx::Error> {
    sqlx::query_as::<_, Station>(
        "SELECT station_id, name, latitude, longitude, capacity, updated_at
         FROM stations WHERE station_id = $1",
    )
    .bind(station_id)
    .fetch_optional(pool)
    .await
}

/// All stations joined with their latest status row (if any).
pub async fn list_stations_with_latest_status(
    pool: &PgPool,
) -> Result<Vec<StationWithStatus>, sqlx::Error> {
    sqlx::query_as::<_, StationWithStatus>(
        "SELECT s.station_id, s.name, s.latitude, s.longitude, s.capacity,
                st.bikes_available, st.docks_available, st.is_renting, st.scraped_at
         FROM stations s
         LEFT JOIN LATERAL (
             SELECT bikes_available, docks_available, is_renting, scraped_at
             FROM station_status
             WHERE station_id = s.station_id
             ORDER BY scraped_at DESC
             LIMIT 1
         ) st ON TRUE
         ORDER BY s.name",
    )
    .fetch_all(pool)
    .await
}

/// Summed capacity of the given stations (missing capacities count as 0).
pub async fn sum_capacity(pool: &PgPool, station_ids: &[String]) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(capacity), 0)::BIGINT FROM stations WHERE station_id = ANY($1)",
    )
    .bind(station_ids)
    .fetch_one(pool)
    .await
}

// ---------------------------------------------------------------------------
// Status history
// ---------------------------------------------------------------------------

/// Append status rows with one `UNNEST` statement (append-only history).
pub async fn insert_status_batch(
    pool: &PgPool,
    rows: &[InsertStatusParams],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }
    let ids: Vec<Uuid> = rows.iter().map(|_| Uuid::new_v4()).collect();
    let station_ids: Vec<String> = rows.iter().map(|r| r.station_id.clone()).collect();
    let scraped_at: Vec<DateTime<Utc>> = rows.iter().map(|r| r.scraped_at).collect();
    let bikes: Vec<i32> = rows.iter().map(|r| r.bikes_available).collect();
    let docks: Vec<i32> = rows.iter().map(|r| r.docks_available).collect();
    let renting: Vec<bool> = rows.iter().map(|r| r.is_renting).collect();
    let last_reported: Vec<Option<DateTime<Utc>>> = rows.iter().map(|r| r.last_reported).collect();

    let result = sqlx::query(
        "INSERT INTO station_status (
            id, station_id, scraped_at, bikes_available, docks_available,
            is_renting, last_reported
         )
         SELECT * FROM UNNEST(
            $1::UUID[], $2::TEXT[], $3::TIMESTAMPTZ[], $4::INT[], $5::INT[],
            $6::BOOL[], $7::TIMESTAMPTZ[]
         )",
    )
    .bind(&ids)
    .bind(&station_ids)
    .bind(&scraped_at)
    .bind(&bikes)
    .bind(&docks)
    .bind(&renting)
    .bind(&last_reported)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Most recent status row for a station.
pub async fn get_latest_status(
    pool: &PgPool,
    station_id: &str,
) -> Result<Option<StatusRecord>, sqlx::Error> {
    sqlx::query_as::<_, StatusRecord>(
        "SELECT id, station_id, scraped_at, bikes_available, docks_available,
                is_renting, last_reported
         FROM station_status
         WHERE station_id = $1
         ORDER BY scraped_at DESC
         LIMIT 1",
    )
    .bind(station_id)
    .fetch_optional(pool)
    .await
}

/// Mean bikes available per `bucket_minutes` bucket for status rows scraped
/// at or after `since`, oldest bucket first.
///
/// Buckets are aligned on the Unix epoch, matching `ml::features::bucket_start`.
pub async fn get_bucket_averages(
    pool: &PgPool,
    since: DateTime<Utc>,
    bucket_minutes: i64,
) -> Result<Vec<BucketAverage>, sqlx::Error> {
    sqlx::query_as::<_, BucketAverage>(
        "SELECT date_bin(make_interval(mins => $2), scraped_at, TIMESTAMPTZ 'epoch') AS bucket,
                AVG(bikes_available)::FLOAT8 AS mean_bikes,
                COUNT(*) AS samples
         FROM station_status
         WHERE scraped_at >= $1 AND bikes_available >= 0
         GROUP BY 1
         ORDER BY 1",
    )
    .bind(since)
    .bind(bucket_minutes as i32)
    .fetch_all(pool)
    .await
}

/// Hour-of-day averages over a station's last `limit` status rows.
///
/// `use_docks` selects docks instead of bikes.
pub async fn get_station_hourly_averages(
    pool: &PgPool,
    station_id: &str,
    use_docks: bool,
    limit: i64,
) -> Result<Vec<HourlyAverage>, sqlx::Error> {
    sqlx::query_as::<_, HourlyAverage>(
        "SELECT EXTRACT(HOUR FROM scraped_at AT TIME ZONE 'UTC')::INT AS hour,
                AVG(CASE WHEN $2 THEN docks_available ELSE bikes_available END)::FLOAT8 AS avg_value
         FROM (
             SELECT scraped_at, bikes_available, docks_available
             FROM station_status
             WHERE station_id = $1
             ORDER BY scraped_at DESC
             LIMIT $3
         ) recent
         GROUP BY 1
         ORDER BY 1",
    )
    .bind(station_id)
    .bind(use_docks)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Hour-of-day bike averages over all history of the given stations.
pub async fn get_hourly_averages_for_stations(
    pool: &PgPool,
    station_ids: &[String],
) -> Result<Vec<HourlyAverage>, sqlx::Error> {
    sqlx::query_as::<_, HourlyAverage>(
        "SELECT EXTRACT(HOUR FROM scraped_at AT TIME ZONE 'UTC')::INT AS hour,
                AVG(bikes_available)::FLOAT8 AS avg_value
         FROM station_status
         WHERE station_id = ANY($1)
         GROUP BY 1
         ORDER BY 1",
    )
    .bind(station_ids)
    .fetch_all(pool)
    .await
}

/// Station/status counters for the monitoring view.
pub async fn get_store_counts(pool: &PgPool) -> Result<StoreCounts, sqlx::Error> {
    sqlx::query_as::<_, StoreCounts>(
        "SELECT (SELECT COUNT(*) FROM stations) AS total_stations,
                (SELECT COUNT(*) FROM station_status) AS total_status_rows,
                (SELECT MAX(scraped_at) FROM station_status) AS last_scraped_at",
    )
    .fetch_one(pool)
    .await
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Append a current-conditions observation.
pub async fn insert_weather_observation(
    pool: &PgPool,
    params: InsertObservationParams,
) -> Result<WeatherObservation, sqlx::Error> {
    sqlx::query_as::<_, WeatherObservation>(
        "INSERT INTO weather_observations (
            id, observed_at, temperature, windspeed, weather_code, source
         ) VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, observed_at, temperature, windspeed, weather_code, source",
    )
    .bind(Uuid::new_v4())
    .bind(params.observed_at)
    .bind(params.temperature)
    .bind(params.windspeed)
    .bind(params.weather_code)
    .bind(&params.source)
    .fetch_one(pool)
    .await
}

/// Latest observation, if any.
pub async fn get_latest_observation(
    pool: &PgPool,
) -> Result<Option<WeatherObservation>, sqlx::Error> {
    sqlx::query_as::<_, WeatherObservation>(
        "SELECT id, observed_at, temperature, windspeed, weather_code, source
         FROM weather_observations
         ORDER BY observed_at DESC
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
}

/// Observations at or after `since`, oldest first.
pub async fn get_observations_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<WeatherObservation>, sqlx::Error> {
    sqlx::query_as::<_, WeatherObservation>(
        "SELECT id, observed_at, temperature, windspeed, weather_code, source
         FROM weather_observations
         WHERE observed_at >= $1
         ORDER BY observed_at ASC",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Upsert forecast rows keyed by `forecast_time` in one transaction.
///
/// Returns `(inserted, updated)`.
pub async fn upsert_forecasts(
    pool: &PgPool,
    rows: &[UpsertForecastParams],
    fetched_at: DateTime<Utc>,
) -> Result<(u64, u64), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    let mut updated = 0;
    for r in rows {
        // xmax = 0 only for freshly inserted tuples.
        let was_insert = sqlx::query_scalar::<_, bool>(
            "INSERT INTO weather_forecasts (
                forecast_time, temperature, windspeed, weather_code, precipitation, last_updated
             ) VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (forecast_time) DO UPDATE SET
                temperature = EXCLUDED.temperature,
                windspeed = EXCLUDED.windspeed,
                weather_code = EXCLUDED.weather_code,
                precipitation = EXCLUDED.precipitation,
                last_updated = EXCLUDED.last_updated
             RETURNING (xmax = 0)",
        )
        .bind(r.forecast_time)
        .bind(r.temperature)
        .bind(r.windspeed)
        .bind(r.weather_code)
        .bind(r.precipitation)
        .bind(fetched_at)
        .fetch_one(&mut *tx)
        .await?;
        if was_insert {
            inserted += 1;
        } else {
            updated += 1;
        }
    }
    tx.commit().await?;
    Ok((inserted, updated))
}

/// The next `limit` forecast rows at or after `from`, ascending by time.
pub async fn get_upcoming_forecasts(
    pool: &PgPool,
    from: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<WeatherForecastEntry>, sqlx::Error> {
    sqlx::query_as::<_, WeatherForecastEntry>(
        "SELECT forecast_time, temperature, windspeed, weather_code, precipitation, last_updated
         FROM weather_forecasts
         WHERE forecast_time >= $1
         ORDER BY forecast_time ASC
         LIMIT $2",
    )
    .bind(from)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, name: &str) -> UpsertStationParams {
        UpsertStationParams {
            station_id: id.to_string(),
            name: name.to_string(),
            latitude: Decimal::new(488566, 4),
            longitude: Decimal::new(23522, 4),
            capacity: Some(20),
        }
    }

    #[test]
    fn test_repeated_station_keeps_last_entry() {
        let batch = [
            station("16107", "Benjamin Godard"),
            station("213688139", "Toudouze"),
            station("16107", "Benjamin Godard - Victor Hugo"),
        ];
        let latest = last_entry_per_station(&batch);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].name, "Benjamin Godard - Victor Hugo");
        assert_eq!(latest[1].station_id, "213688139");
    }

    #[test]
    fn test_empty_batch() {
        assert!(last_entry_per_station(&[]).is_empty());
    }
}
