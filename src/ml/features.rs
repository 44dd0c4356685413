//! Feature construction shared by training and serving.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::{
    BUCKET_MINUTES, DEFAULT_TEMPERATURE, DEFAULT_WEATHER_CODE, DEFAULT_WINDSPEED, NUM_FEATURES,
};

/// Number of rows produced when synthetic data replaces observed data.
pub const SYNTHETIC_ROW_COUNT: usize = 1000;

/// Weather codes drawn for synthetic rows (clear through showers).
const SYNTHETIC_WEATHER_CODES: [i32; 8] = [0, 1, 2, 3, 45, 51, 61, 80];

/// One status reading reduced to what the model needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSample {
    pub timestamp: DateTime<Utc>,
    pub bikes_available: f64,
}

/// Mean bikes available over every status row of one bucket.
///
/// The trainer gets these straight from the store; `aggregate_status` builds
/// the same thing from raw samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketTarget {
    pub bucket: DateTime<Utc>,
    pub mean_bikes: f64,
    /// Status rows behind the mean
    pub samples: i64,
}

/// One weather reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSample {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub windspeed: f64,
    pub weather_code: i32,
}

/// Model input for a single point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub hour: u32,
    pub day_of_week: u32,
    pub temperature: f64,
    pub windspeed: f64,
    pub weather_code: i32,
}

impl FeatureVector {
    /// Build features for `time`, using its bucket for the calendar fields.
    pub fn at(time: DateTime<Utc>, temperature: f64, windspeed: f64, weather_code: i32) -> Self {
        let bucket = bucket_start(time);
        Self {
            hour: bucket.hour(),
            day_of_week: bucket.weekday().num_days_from_monday(),
            temperature,
            windspeed,
            weather_code,
        }
    }

    /// Values in `FEATURE_NAMES` order.
    pub fn to_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.hour as f64,
            self.day_of_week as f64,
            self.temperature,
            self.windspeed,
            self.weather_code as f64,
        ]
    }
}

/// One aggregated bucket: features plus the global mean of bikes available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingRow {
    pub features: FeatureVector,
    pub target_bikes: f64,
}

/// Floor a timestamp to the start of its `BUCKET_MINUTES` bucket.
pub fn bucket_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let width = BUCKET_MINUTES * 60;
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(width);
    DateTime::from_timestamp(floored, 0).unwrap_or(ts)
}

#[derive(Default)]
struct WeatherAccumulator {
    temperature_sum: f64,
    windspeed_sum: f64,
    count: usize,
    max_code: Option<i32>,
}

/// Reduce raw status samples to one `BucketTarget` per bucket.
///
/// Negative and non-finite readings are dropped. Output is in ascending
/// bucket order.
pub fn aggregate_status(status: &[StatusSample]) -> Vec<BucketTarget> {
    let mut sums: BTreeMap<DateTime<Utc>, (f64, i64)> = BTreeMap::new();
    let mut dropped = 0usize;
    for s in status {
        if !s.bikes_available.is_finite() || s.bikes_available < 0.0 {
            dropped += 1;
            continue;
        }
        let entry = sums.entry(bucket_start(s.timestamp)).or_insert((0.0, 0));
        entry.0 += s.bikes_available;
        entry.1 += 1;
    }
    if dropped > 0 {
        tracing::debug!("Dropped {} malformed status samples", dropped);
    }
    sums.into_iter()
        .map(|(bucket, (sum, samples))| BucketTarget {
            bucket,
            mean_bikes: sum / samples as f64,
            samples,
        })
        .collect()
}

/// Aggregate raw status and weather history into training rows.
pub fn build_training_rows(status: &[StatusSample], weather: &[WeatherSample]) -> Vec<TrainingRow> {
    join_weather(&aggregate_status(status), weather)
}

/// Attach weather to per-bucket targets.
///
/// Targets are re-keyed with `bucket_start`; two targets landing in the same
/// bucket are merged, weighted by sample count. Each bucket takes the mean
/// temperature/windspeed and max weather code observed in the same bucket;
/// buckets without an observation inherit the previous bucket's weather, or
/// the defaults when no earlier bucket exists. Rows come out in ascending
/// bucket order and non-finite inputs are dropped.
pub fn join_weather(targets: &[BucketTarget], weather: &[WeatherSample]) -> Vec<TrainingRow> {
    let mut merged: BTreeMap<DateTime<Utc>, (f64, i64)> = BTreeMap::new();
    for t in targets {
        if t.samples <= 0 || !t.mean_bikes.is_finite() || t.mean_bikes < 0.0 {
            tracing::debug!("Skipping malformed bucket {}", t.bucket);
            continue;
        }
        let entry = merged.entry(bucket_start(t.bucket)).or_insert((0.0, 0));
        entry.0 += t.mean_bikes * t.samples as f64;
        entry.1 += t.samples;
    }

    let mut weather_buckets: BTreeMap<DateTime<Utc>, WeatherAccumulator> = BTreeMap::new();
    for w in weather {
        if !w.temperature.is_finite() || !w.windspeed.is_finite() {
            continue;
        }
        let acc = weather_buckets.entry(bucket_start(w.timestamp)).or_default();
        acc.temperature_sum += w.temperature;
        acc.windspeed_sum += w.windspeed;
        acc.count += 1;
        acc.max_code = Some(acc.max_code.map_or(w.weather_code, |c| c.max(w.weather_code)));
    }

    let mut rows = Vec::with_capacity(merged.len());
    let mut previous: Option<(f64, f64, i32)> = None;
    for (bucket, (sum, samples)) in merged {
        let matched = weather_buckets.get(&bucket).and_then(|acc| {
            let code = acc.max_code?;
            let n = acc.count as f64;
            Some((acc.temperature_sum / n, acc.windspeed_sum / n, code))
        });
        let (temperature, windspeed, weather_code) = matched
            .or(previous)
            .unwrap_or((DEFAULT_TEMPERATURE, DEFAULT_WINDSPEED, DEFAULT_WEATHER_CODE));
        previous = Some((temperature, windspeed, weather_code));

        let target_bikes = sum / samples as f64;
        if !target_bikes.is_finite() {
            continue;
        }

        rows.push(TrainingRow {
            features: FeatureVector::at(bucket, temperature, windspeed, weather_code),
            target_bikes,
        });
    }

    rows
}

/// Generate `count` synthetic rows from a seeded formula.
///
/// Base of 15 bikes, +10 during the 7–9h and 17–19h rush, +5 above 20 °C,
/// −10 for precipitation codes (> 50), plus N(0, 3) noise clamped at zero.
pub fn synthetic_rows(count: usize, seed: u64) -> Vec<TrainingRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(count);

    for _ in 0..count {
        let hour: u32 = rng.gen_range(0..24);
        let day_of_week: u32 = rng.gen_range(0..7);
        let temp_noise: f64 = rng.sample(StandardNormal);
        let wind_noise: f64 = rng.sample(StandardNormal);
        let temperature = (DEFAULT_TEMPERATURE + 5.0 * temp_noise).clamp(-5.0, 35.0);
        let windspeed = (DEFAULT_WINDSPEED + 5.0 * wind_noise).clamp(0.0, 100.0);
        let weather_code = *SYNTHETIC_WEATHER_CODES
            .choose(&mut rng)
            .unwrap_or(&DEFAULT_WEATHER_CODE);

        let mut base = 15.0;
        if (7..=9).contains(&hour) || (17..=19).contains(&hour) {
            base += 10.0;
        }
        if temperature > 20.0 {
            base += 5.0;
        }
        if weather_code > 50 {
            base -= 10.0;
        }
        let noise: f64 = rng.sample(StandardNormal);

        rows.push(TrainingRow {
            features: FeatureVector {
                hour,
                day_of_week,
                temperature,
                windspeed,
                weather_code,
            },
            target_bikes: (base + 3.0 * noise).max(0.0),
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    fn status(t: &str, bikes: f64) -> StatusSample {
        StatusSample {
            timestamp: ts(t),
            bikes_available: bikes,
        }
    }

    fn weather(t: &str, temp: f64, wind: f64, code: i32) -> WeatherSample {
        WeatherSample {
            timestamp: ts(t),
            temperature: temp,
            windspeed: wind,
            weather_code: code,
        }
    }

    #[test]
    fn test_bucket_start_floors_to_ten_minutes() {
        assert_eq!(
            bucket_start(ts("2026-03-02T07:19:59Z")),
            ts("2026-03-02T07:10:00Z")
        );
        assert_eq!(
            bucket_start(ts("2026-03-02T07:10:00Z")),
            ts("2026-03-02T07:10:00Z")
        );
        assert_eq!(
            bucket_start(ts("2026-03-02T23:59:59Z")),
            ts("2026-03-02T23:50:00Z")
        );
    }

    #[test]
    fn test_feature_vector_calendar_fields() {
        // 2026-03-02 is a Monday, 2026-03-08 a Sunday.
        let monday = FeatureVector::at(ts("2026-03-02T07:45:00Z"), 10.0, 5.0, 3);
        assert_eq!(monday.hour, 7);
        assert_eq!(monday.day_of_week, 0);
        let sunday = FeatureVector::at(ts("2026-03-08T23:55:00Z"), 10.0, 5.0, 3);
        assert_eq!(sunday.hour, 23);
        assert_eq!(sunday.day_of_week, 6);
        assert_eq!(sunday.to_array(), [23.0, 6.0, 10.0, 5.0, 3.0]);
    }

    #[test]
    fn test_aggregates_global_mean_per_bucket() {
        let rows = build_training_rows(
            &[
                status("2026-03-02T08:01:00Z", 10.0),
                status("2026-03-02T08:05:00Z", 20.0),
                status("2026-03-02T08:09:59Z", 30.0),
                status("2026-03-02T08:10:00Z", 4.0),
            ],
            &[],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].target_bikes, 20.0);
        assert_eq!(rows[1].target_bikes, 4.0);
    }

    #[test]
    fn test_weather_join_mean_and_max_code() {
        let rows = build_training_rows(
            &[status("2026-03-02T08:02:00Z", 10.0)],
            &[
                weather("2026-03-02T08:00:00Z", 10.0, 4.0, 3),
                weather("2026-03-02T08:07:00Z", 12.0, 6.0, 61),
            ],
        );
        assert_eq!(rows.len(), 1);
        let f = rows[0].features;
        assert_eq!(f.temperature, 11.0);
        assert_eq!(f.windspeed, 5.0);
        assert_eq!(f.weather_code, 61);
    }

    #[test]
    fn test_defaults_then_forward_fill() {
        let rows = build_training_rows(
            &[
                status("2026-03-02T08:00:00Z", 1.0),
                status("2026-03-02T08:10:00Z", 2.0),
                status("2026-03-02T08:20:00Z", 3.0),
            ],
            &[weather("2026-03-02T08:12:00Z", 20.0, 2.0, 2)],
        );
        assert_eq!(rows.len(), 3);
        // No earlier weather: defaults.
        assert_eq!(rows[0].features.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(rows[0].features.windspeed, DEFAULT_WINDSPEED);
        assert_eq!(rows[0].features.weather_code, DEFAULT_WEATHER_CODE);
        // Exact match.
        assert_eq!(rows[1].features.temperature, 20.0);
        // Forward-filled from the previous bucket.
        assert_eq!(rows[2].features.temperature, 20.0);
        assert_eq!(rows[2].features.weather_code, 2);
    }

    #[test]
    fn test_drops_malformed_status() {
        let rows = build_training_rows(
            &[
                status("2026-03-02T08:00:00Z", f64::NAN),
                status("2026-03-02T08:10:00Z", -1.0),
                status("2026-03-02T08:20:00Z", 5.0),
            ],
            &[weather("2026-03-02T08:20:00Z", f64::INFINITY, 2.0, 2)],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target_bikes, 5.0);
        // The non-finite observation is ignored, so defaults apply.
        assert_eq!(rows[0].features.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn test_rows_are_sorted_regardless_of_input_order() {
        let rows = build_training_rows(
            &[
                status("2026-03-02T10:00:00Z", 1.0),
                status("2026-03-02T08:00:00Z", 2.0),
            ],
            &[],
        );
        assert_eq!(rows[0].features.hour, 8);
        assert_eq!(rows[1].features.hour, 10);
    }

    #[test]
    fn test_calendar_ranges_hold_over_a_week() {
        let start = ts("2026-03-02T00:00:00Z");
        let samples: Vec<StatusSample> = (0..(7 * 24 * 6))
            .map(|i| StatusSample {
                timestamp: start + Duration::minutes(10 * i + 3),
                bikes_available: (i % 17) as f64,
            })
            .collect();
        let rows = build_training_rows(&samples, &[]);
        assert_eq!(rows.len(), samples.len());
        for r in &rows {
            assert!(r.features.hour <= 23);
            assert!(r.features.day_of_week <= 6);
        }
        let days: std::collections::BTreeSet<u32> =
            rows.iter().map(|r| r.features.day_of_week).collect();
        assert_eq!(days.len(), 7);
    }

    #[test]
    fn test_build_is_idempotent() {
        let status: Vec<StatusSample> = (0..300)
            .map(|i| StatusSample {
                timestamp: ts("2026-03-02T00:00:00Z") + Duration::minutes(i * 3),
                bikes_available: ((i * 7) % 23) as f64,
            })
            .collect();
        let weather: Vec<WeatherSample> = (0..40)
            .map(|i| WeatherSample {
                timestamp: ts("2026-03-02T00:00:00Z") + Duration::minutes(i * 25),
                temperature: 8.0 + i as f64 * 0.1,
                windspeed: 3.0,
                weather_code: (i % 4) as i32,
            })
            .collect();
        let a = build_training_rows(&status, &weather);
        let b = build_training_rows(&status, &weather);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_bucket_count_does_not_depend_on_station_count() {
        // 1500 stations scraped every two minutes for 17 hours.
        let start = ts("2026-03-02T00:00:00Z");
        let scrapes = 17 * 30;
        let mut samples = Vec::with_capacity(scrapes * 1500);
        for scrape in 0..scrapes {
            let at = start + Duration::minutes(2 * scrape as i64);
            for station in 0..1500 {
                samples.push(StatusSample {
                    timestamp: at,
                    bikes_available: (station % 20) as f64,
                });
            }
        }
        let targets = aggregate_status(&samples);
        assert_eq!(targets.len(), 17 * 6);
        assert!(targets.iter().all(|t| t.samples == 5 * 1500));
        assert!(targets.iter().all(|t| (t.mean_bikes - 9.5).abs() < 1e-9));
    }

    #[test]
    fn test_join_weather_merges_targets_sharing_a_bucket() {
        let rows = join_weather(
            &[
                BucketTarget {
                    bucket: ts("2026-03-02T08:00:00Z"),
                    mean_bikes: 10.0,
                    samples: 3,
                },
                BucketTarget {
                    bucket: ts("2026-03-02T08:05:00Z"),
                    mean_bikes: 2.0,
                    samples: 1,
                },
                BucketTarget {
                    bucket: ts("2026-03-02T08:10:00Z"),
                    mean_bikes: 4.0,
                    samples: 0,
                },
            ],
            &[],
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target_bikes, 8.0);
    }

    #[test]
    fn test_synthetic_rows_deterministic_and_bounded() {
        let a = synthetic_rows(200, 42);
        let b = synthetic_rows(200, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);
        for r in &a {
            assert!(r.features.hour <= 23);
            assert!(r.features.day_of_week <= 6);
            assert!((-5.0..=35.0).contains(&r.features.temperature));
            assert!(r.features.windspeed >= 0.0);
            assert!(r.target_bikes >= 0.0);
            assert!(SYNTHETIC_WEATHER_CODES.contains(&r.features.weather_code));
        }
        assert_ne!(synthetic_rows(50, 1), synthetic_rows(50, 2));
    }
}
