use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// Station metadata from the information feed.
#[derive(Debug, Clone, FromRow)]
pub struct Station {
    pub station_id: String,
    pub name: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub capacity: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// One scrape of one station's availability.
#[derive(Debug, Clone, FromRow)]
pub struct StatusRecord {
    pub id: Uuid,
    pub station_id: String,
    pub scraped_at: DateTime<Utc>,
    pub bikes_available: i32,
    pub docks_available: i32,
    pub is_renting: bool,
    pub last_reported: Option<DateTime<Utc>>,
}

/// A station joined with its most recent status row (map view).
#[derive(Debug, Clone, FromRow)]
pub struct StationWithStatus {
    pub station_id: String,
    pub name: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub capacity: Option<i32>,
    pub bikes_available: Option<i32>,
    pub docks_available: Option<i32>,
    pub is_renting: Option<bool>,
    pub scraped_at: Option<DateTime<Utc>>,
}

/// Current weather conditions captured at scrape time.
#[derive(Debug, Clone, FromRow)]
pub struct WeatherObservation {
    pub id: Uuid,
    pub observed_at: DateTime<Utc>,
    pub temperature: Decimal,
    pub windspeed: Decimal,
    pub weather_code: i32,
    pub source: String,
}

/// Hourly forecast row, unique per `forecast_time`.
#[derive(Debug, Clone, FromRow)]
pub struct WeatherForecastEntry {
    pub forecast_time: DateTime<Utc>,
    pub temperature: Decimal,
    pub windspeed: Decimal,
    pub weather_code: i32,
    pub precipitation: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}

/// Network-wide mean bikes available over one training bucket.
#[derive(Debug, Clone, FromRow)]
pub struct BucketAverage {
    pub bucket: DateTime<Utc>,
    pub mean_bikes: f64,
    pub samples: i64,
}

/// Average availability for one hour of the day.
#[derive(Debug, Clone, FromRow)]
pub struct HourlyAverage {
    pub hour: i32,
    pub avg_value: f64,
}
