//! Numeric conversions between the feeds (f64) and the store (`NUMERIC`),
//! plus the distance helper used by the nearest-station lookup.
//!
//! Weather readings are kept at one decimal; station coordinates keep
//! whatever precision the GBFS feed delivered. Non-finite readings have no
//! `NUMERIC` form: the conversions return `None` and the caller drops the row.

use haversine::{distance, Location, Units};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Weather reading to `NUMERIC(.., 1)`.
pub(crate) fn f64_to_decimal_1dp(v: f64) -> Option<Decimal> {
    f64_to_decimal_full(v)
        .map(|d| d.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
}

/// Coordinate to `NUMERIC` without rounding.
pub(crate) fn f64_to_decimal_full(v: f64) -> Option<Decimal> {
    if !v.is_finite() {
        return None;
    }
    Decimal::from_f64(v)
}

/// Stored value back to f64; unrepresentable values read as 0.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or_default()
}

pub(crate) fn opt_dec_to_f64(d: Option<Decimal>) -> Option<f64> {
    d.as_ref().and_then(ToPrimitive::to_f64)
}

/// Great-circle distance between two WGS84 points, in kilometres.
pub(crate) fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    distance(
        Location {
            latitude: lat1,
            longitude: lon1,
        },
        Location {
            latitude: lat2,
            longitude: lon2,
        },
        Units::Kilometers,
    )
}
